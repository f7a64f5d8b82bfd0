//! Tests for the three block-lifecycle stores in isolation: the single-slot state repository, the
//! block pool, and the committed ledger.

use log::LevelFilter;

use pbft_rs::consensus::round::{Consensus, Phase};
use pbft_rs::consensus::state_repository::{StateError, StateRepository};
use pbft_rs::pool::{BlockPool, PoolError};
use pbft_rs::state::committed_blocks::{CommittedBlockRepository, LedgerError};
use pbft_rs::types::basic::{BlockHeight, Body, Seal};
use pbft_rs::types::block::{Block, BlockState};
use pbft_rs::types::representatives::{Representative, RepresentativeSet};

mod common;

use crate::common::{logging::setup_logger, mem_db::MemDB};

fn round() -> Consensus {
    let representatives = RepresentativeSet::new(vec![
        Representative::new("leader"),
        Representative::new("member"),
    ]);
    let block = Block::genesis(Body::new(b"payload".to_vec())).proposed();
    Consensus::new(representatives, block).unwrap()
}

#[test]
fn state_repository_holds_exactly_one_round() {
    let repository = StateRepository::new();
    assert_eq!(repository.load().unwrap_err(), StateError::EmptyRepo);

    let active = round();
    repository.save(active.clone()).unwrap();
    assert_eq!(repository.load().unwrap(), active);

    // A round with a different id cannot displace the active one.
    let intruder = round();
    assert_eq!(
        repository.save(intruder).unwrap_err(),
        StateError::InvalidSave
    );
    assert_eq!(repository.load().unwrap(), active);

    // A newer snapshot of the same round overwrites the stored one.
    let mut advanced = active.clone();
    advanced.start().unwrap();
    repository.save(advanced).unwrap();
    assert_eq!(repository.load().unwrap().phase(), Phase::PrePrepare);

    repository.remove();
    assert_eq!(repository.load().unwrap_err(), StateError::EmptyRepo);

    // The slot is reusable after removal.
    repository.save(round()).unwrap();
}

#[test]
fn state_repository_update_requires_an_active_round() {
    let repository = StateRepository::new();
    assert_eq!(
        repository.update(|round| round.phase()).unwrap_err(),
        StateError::EmptyRepo
    );

    repository.save(round()).unwrap();
    let phase = repository
        .update(|round| {
            round.start().unwrap();
            round.phase()
        })
        .unwrap();
    assert_eq!(phase, Phase::PrePrepare);
    // The mutation is visible to subsequent loads.
    assert_eq!(repository.load().unwrap().phase(), Phase::PrePrepare);
}

#[test]
fn pool_rejects_committed_blocks() {
    let pool = BlockPool::new();

    let created = Block::genesis(Body::new(b"created".to_vec()));
    pool.add_created_block(created).unwrap();

    let mut committed = Block::genesis(Body::new(b"committed".to_vec()));
    committed.state = BlockState::Committed;
    assert_eq!(
        pool.add_created_block(committed).unwrap_err(),
        PoolError::InvalidStateBlock {
            state: BlockState::Committed
        }
    );
}

#[test]
fn pool_staged_lookups_see_only_staged_blocks() {
    let pool = BlockPool::new();
    let block = Block::genesis(Body::new(b"payload".to_vec()));
    pool.add_created_block(block.clone()).unwrap();

    // A Created block is invisible to the staged lookups.
    assert_eq!(
        pool.get_staged_block_by_seal(&block.seal).unwrap_err(),
        PoolError::NoStagedBlock
    );
    assert_eq!(
        pool.get_staged_block_by_height(BlockHeight::new(0))
            .unwrap_err(),
        PoolError::NoStagedBlock
    );

    pool.mark_staged(&block.seal).unwrap();
    assert_eq!(
        pool.get_staged_block_by_seal(&block.seal).unwrap().state,
        BlockState::Staged
    );
    assert_eq!(
        pool.get_staged_block_by_height(BlockHeight::new(0))
            .unwrap()
            .seal,
        block.seal
    );

    pool.revert_to_created(&block.seal).unwrap();
    assert_eq!(
        pool.get_staged_block_by_seal(&block.seal).unwrap_err(),
        PoolError::NoStagedBlock
    );
    // The any-state lookup still sees it.
    assert_eq!(
        pool.get_block_by_seal(&block.seal).unwrap().state,
        BlockState::Created
    );
}

#[test]
fn pool_returns_the_lowest_staged_block_first() {
    let pool = BlockPool::new();
    assert_eq!(
        pool.get_first_staged_block().unwrap_err(),
        PoolError::NoStagedBlock
    );

    let block_at = |height: u64, tag: &[u8]| {
        Block::new(
            BlockHeight::new(height),
            Seal::new(Vec::new()),
            Body::new(tag.to_vec()),
        )
    };
    let at_five = block_at(5, b"five");
    let at_two = block_at(2, b"two");
    let at_eight = block_at(8, b"eight");

    for block in [&at_five, &at_two, &at_eight] {
        pool.add_created_block(block.clone()).unwrap();
    }
    pool.mark_staged(&at_five.seal).unwrap();
    pool.mark_staged(&at_two.seal).unwrap();
    // The height-8 block stays Created and must not be considered.

    assert_eq!(pool.get_first_staged_block().unwrap().seal, at_two.seal);

    pool.remove_by_seal(&at_two.seal).unwrap();
    assert_eq!(pool.get_first_staged_block().unwrap().seal, at_five.seal);

    // Equal heights break the tie deterministically on the smaller seal.
    let rival = block_at(5, b"rival");
    pool.add_created_block(rival.clone()).unwrap();
    pool.mark_staged(&rival.seal).unwrap();
    let expected = std::cmp::min(&at_five.seal, &rival.seal);
    assert_eq!(&pool.get_first_staged_block().unwrap().seal, expected);
}

#[test]
fn pool_removal_is_by_exact_seal() {
    let pool = BlockPool::new();
    let block = Block::genesis(Body::new(b"payload".to_vec()));

    assert_eq!(
        pool.remove_by_seal(&block.seal).unwrap_err(),
        PoolError::FailRemoveBlock
    );

    pool.add_created_block(block.clone()).unwrap();
    pool.remove_by_seal(&block.seal).unwrap();
    assert_eq!(
        pool.get_block_by_seal(&block.seal).unwrap_err(),
        PoolError::NoStagedBlock
    );
}

#[test]
fn ledger_appends_and_serves_sequential_blocks() {
    setup_logger(LevelFilter::Trace);

    let ledger = CommittedBlockRepository::new(MemDB::new());
    assert!(matches!(
        ledger.get_last_block().unwrap_err(),
        LedgerError::GetCommittedBlock { .. }
    ));
    assert!(ledger.last_height().unwrap().is_none());

    let genesis = Block::genesis(Body::new(b"genesis".to_vec()));
    let child = Block::child_of(&genesis, Body::new(b"child".to_vec()));

    ledger.save(&genesis).unwrap();
    ledger.save(&child).unwrap();

    assert_eq!(ledger.last_height().unwrap(), Some(BlockHeight::new(1)));

    let last = ledger.get_last_block().unwrap();
    assert_eq!(last.seal, child.seal);
    // Commitment forces the stored state regardless of what the caller passed in.
    assert_eq!(last.state, BlockState::Committed);

    let by_height = ledger.get_block_by_height(BlockHeight::new(0)).unwrap();
    assert_eq!(by_height.seal, genesis.seal);

    let by_seal = ledger.get_block_by_seal(&child.seal).unwrap();
    assert_eq!(by_seal.height, BlockHeight::new(1));

    assert!(matches!(
        ledger.get_block_by_height(BlockHeight::new(2)).unwrap_err(),
        LedgerError::GetCommittedBlock { .. }
    ));
}

#[test]
fn ledger_rejects_recommitting_a_seal() {
    let ledger = CommittedBlockRepository::new(MemDB::new());
    let genesis = Block::genesis(Body::new(b"genesis".to_vec()));

    ledger.save(&genesis).unwrap();
    assert!(matches!(
        ledger.save(&genesis).unwrap_err(),
        LedgerError::DuplicateBlock { .. }
    ));

    // The rejected re-commit left the ledger untouched.
    assert_eq!(ledger.last_height().unwrap(), Some(BlockHeight::new(0)));
}

#[test]
fn ledger_rejects_blocks_that_skip_a_height() {
    let ledger = CommittedBlockRepository::new(MemDB::new());
    let genesis = Block::genesis(Body::new(b"genesis".to_vec()));
    let child = Block::child_of(&genesis, Body::new(b"child".to_vec()));
    let grandchild = Block::child_of(&child, Body::new(b"grandchild".to_vec()));

    // A non-genesis block cannot open an empty ledger.
    assert!(matches!(
        ledger.save(&child).unwrap_err(),
        LedgerError::NonSequentialHeight { .. }
    ));

    ledger.save(&genesis).unwrap();
    assert!(matches!(
        ledger.save(&grandchild).unwrap_err(),
        LedgerError::NonSequentialHeight { .. }
    ));
    ledger.save(&child).unwrap();
    ledger.save(&grandchild).unwrap();
    assert_eq!(ledger.last_height().unwrap(), Some(BlockHeight::new(2)));
}
