//! Role-level protocol tests driven through the message pools directly.

mod common;

use common::{keypair, node_id, producer_set, transfer, CHAIN_ID, FUNDED_BALANCE, GAS_LIMIT};
use dbft_bft::{
    msg_pool, ConsensusError, FinalizedBlockRound, Member, MemberState, RawBlockRound,
    RoundPayload, RoundProtocol, ROUND_RAW_BLOCK,
};
use dbft_chain::{
    BlockGenerator, ChainReader, ExecuteContext, MemoryDb, RewardCalculator,
    SimpleBlockGenerator, SimpleChain, TrieStore,
};
use dbft_chain::BlockValidator as _;
use dbft_messages::{
    Challenge, Commitment, CompletedBlock, MsgCode, Setup, CHALLENGE_MAGIC, SETUP_MAGIC,
};
use dbft_network::{InboundMsg, MemoryNetwork};
use dbft_types::{
    schnorr, Address, Block, Hash, Keypair, MultiSignature, SchnorrSignature, SignerBitmap,
};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn genesis_chain() -> Arc<SimpleChain> {
    Arc::new(SimpleChain::genesis(
        MemoryDb::new(),
        CHAIN_ID,
        GAS_LIMIT,
        &common::producer_list(4),
        &[(common::FUNDED, FUNDED_BALANCE)],
    ))
}

fn template_on(chain: &SimpleChain, generator: &SimpleBlockGenerator) -> (Block, u64) {
    let parent = chain.best_header();
    let mut trie = TrieStore::at_root(chain.db(), &parent.state_root).unwrap();
    generator
        .generate_template(&mut trie, &parent, Address::ZERO, 10)
        .unwrap()
}

/// Full commit/challenge/response flow over the first `m` producers.
fn multi_sign(m: usize, msg_hash: &Hash) -> MultiSignature {
    let signers: Vec<Keypair> = (0..m).map(keypair).collect();
    let mut nonces = Vec::new();
    let mut commitments = Vec::new();
    for kp in &signers {
        let (nonce, q) = schnorr::generate_nonce_pair(msg_hash, kp.secret()).unwrap();
        nonces.push(nonce);
        commitments.push(q);
    }
    let pubkeys: Vec<_> = signers.iter().map(|kp| kp.public()).collect();
    let sum_q = schnorr::combine_commitments(&commitments).unwrap();
    let sum_p = schnorr::combine_pubkeys(&pubkeys).unwrap();
    let challenge = schnorr::derive_challenge(&sum_q, &sum_p, msg_hash);
    let parts: Vec<_> = signers
        .iter()
        .zip(&nonces)
        .map(|(kp, nonce)| schnorr::partial_sign(msg_hash, kp.secret(), nonce, &sum_q, &sum_p).unwrap())
        .collect();
    let s = schnorr::combine_signatures(&parts).unwrap();

    let mut bitmap = SignerBitmap::with_len(4);
    for i in 0..m {
        bitmap.set(i);
    }
    MultiSignature::new(
        SchnorrSignature {
            r: challenge.to_bytes(),
            s,
        },
        0,
        bitmap,
    )
}

struct MemberHarness {
    member: Member,
    pool_tx: tokio::sync::mpsc::Sender<InboundMsg>,
    leader_rx: tokio::sync::mpsc::UnboundedReceiver<InboundMsg>,
    chain: Arc<SimpleChain>,
    block: Block,
}

/// A member at height 1 whose expected leader is producer 1, with a valid
/// candidate block ready to propose.
fn member_harness() -> MemberHarness {
    common::init_tracing();
    let net = MemoryNetwork::new();
    let (member_sender, _member_rx) = net.register(node_id(0));
    let (_leader_sender, leader_rx) = net.register(node_id(1));

    let chain = genesis_chain();
    let generator = SimpleBlockGenerator::new(CHAIN_ID, GAS_LIMIT);
    let (block, _) = template_on(&chain, &generator);

    let (pool_tx, pool) = msg_pool();
    let leader = common::producer_list(4)[1].clone();
    let member = Member::new(
        WAIT,
        keypair(0),
        1,
        leader,
        Arc::new(member_sender),
        pool,
    );
    MemberHarness {
        member,
        pool_tx,
        leader_rx,
        chain,
        block,
    }
}

fn setup_msg(from: usize, height: u64, block: &Block) -> InboundMsg {
    InboundMsg {
        from: node_id(from),
        code: MsgCode::Setup,
        payload: dbft_messages::encode(&Setup {
            round: ROUND_RAW_BLOCK,
            magic: SETUP_MAGIC,
            height,
            payload: dbft_messages::encode(block),
        }),
    }
}

#[tokio::test(start_paused = true)]
async fn test_stale_height_setup_ignored() {
    let mut harness = member_harness();
    // Height 5 proposal against a member waiting at height 1.
    harness
        .pool_tx
        .send(setup_msg(1, 5, &harness.block))
        .await
        .unwrap();

    let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
        Arc::clone(&harness.chain) as Arc<dyn ChainReader>,
    ));
    let err = harness.member.process_round(round1).await.unwrap_err();
    assert!(matches!(err, ConsensusError::Timeout));
    assert_eq!(harness.member.state(), MemberState::WaitSetupTimeout);
    // No commitment went out for the ignored proposal.
    assert!(harness.leader_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_setup_from_wrong_peer_aborts() {
    let harness = member_harness();
    // Producer 3 proposes although producer 1 holds the leader slot.
    harness
        .pool_tx
        .send(setup_msg(3, 1, &harness.block))
        .await
        .unwrap();

    let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
        Arc::clone(&harness.chain) as Arc<dyn ChainReader>,
    ));
    let err = harness.member.process_round(round1).await.unwrap_err();
    assert!(matches!(err, ConsensusError::LeaderMistake));
    assert_eq!(harness.member.state(), MemberState::Error);
}

#[tokio::test(start_paused = true)]
async fn test_challenge_mismatch_aborts_without_signing() {
    let mut harness = member_harness();
    harness
        .pool_tx
        .send(setup_msg(1, 1, &harness.block))
        .await
        .unwrap();
    // A challenge whose hash does not bind the committed message.
    let bogus = Challenge {
        round: ROUND_RAW_BLOCK,
        magic: CHALLENGE_MAGIC,
        height: 1,
        sigma_q: keypair(5).public(),
        sigma_pubkey: keypair(6).public(),
        r: Hash::digest(b"not the committed message"),
    };
    harness
        .pool_tx
        .send(InboundMsg {
            from: node_id(1),
            code: MsgCode::Challenge,
            payload: dbft_messages::encode(&bogus),
        })
        .await
        .unwrap();

    let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
        Arc::clone(&harness.chain) as Arc<dyn ChainReader>,
    ));
    let err = harness.member.process_round(round1).await.unwrap_err();
    assert!(matches!(err, ConsensusError::Challenge));

    // The commitment was sent, but never a response.
    let first = harness.leader_rx.try_recv().unwrap();
    assert_eq!(first.code, MsgCode::Commitment);
    assert!(harness.leader_rx.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_member_round_completes_and_reset_is_clean() {
    let mut harness = member_harness();
    harness
        .pool_tx
        .send(setup_msg(1, 1, &harness.block))
        .await
        .unwrap();

    let member = &harness.member;
    let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
        Arc::clone(&harness.chain) as Arc<dyn ChainReader>,
    ));

    // Drive the leader side by hand: answer the member's commitment with a
    // single-participant challenge.
    let pool_tx = harness.pool_tx.clone();
    let msg_hash = harness.block.sign_hash();
    let run = member.process_round(round1);
    let reply = async {
        loop {
            if let Ok(msg) = harness.leader_rx.try_recv() {
                let commitment: Commitment = dbft_messages::decode(&msg.payload).unwrap();
                let r = schnorr::derive_challenge(&commitment.q, &commitment.pubkey, &msg_hash);
                let challenge = Challenge {
                    round: ROUND_RAW_BLOCK,
                    magic: CHALLENGE_MAGIC,
                    height: 1,
                    sigma_q: commitment.q,
                    sigma_pubkey: commitment.pubkey,
                    r,
                };
                pool_tx
                    .send(InboundMsg {
                        from: node_id(1),
                        code: MsgCode::Challenge,
                        payload: dbft_messages::encode(&challenge),
                    })
                    .await
                    .unwrap();
                break;
            }
            tokio::task::yield_now().await;
        }
    };
    let (result, ()) = tokio::join!(run, reply);
    let payload = result.unwrap();
    assert!(matches!(payload, RoundPayload::RawBlock(_)));
    assert_eq!(member.state(), MemberState::Completed);

    // Reset returns to Init with no stale signal: the next round must run
    // its full timer rather than terminating instantly.
    member.reset();
    assert_eq!(member.state(), MemberState::Init);
    let round1: Arc<dyn RoundProtocol> = Arc::new(RawBlockRound::new(
        Arc::clone(&harness.chain) as Arc<dyn ChainReader>,
    ));
    let started = tokio::time::Instant::now();
    let err = member.process_round(round1).await.unwrap_err();
    assert!(matches!(err, ConsensusError::Timeout));
    assert!(started.elapsed() >= WAIT);
}

#[tokio::test]
async fn test_round_two_detects_corruption_and_rolls_back() {
    let chain = genesis_chain();
    let genesis_root = chain.best_header().state_root;
    let producers = producer_set(4);

    let generator = SimpleBlockGenerator::new(CHAIN_ID, GAS_LIMIT);
    generator.push_transaction(transfer(0, Address([0xBB; 20]), 1_000));
    let (block, gas_fee) = template_on(&chain, &generator);
    let multi_sig = multi_sign(3, &block.sign_hash());

    // The leader's post-state: execute plus rewards.
    let mut trie = TrieStore::at_root(chain.db(), &genesis_root).unwrap();
    let mut ctx = ExecuteContext::new(&mut trie, &block);
    dbft_chain::ChainBlockValidator::new()
        .execute_block(&mut ctx)
        .unwrap();
    let fees = ctx.fees;
    assert_eq!(fees, gas_fee);
    RewardCalculator::new(&producers, &multi_sig, fees).accumulate_rewards(&mut trie);
    let state_root = trie.commit();

    let completed = CompletedBlock {
        multi_sig,
        state_root,
    };
    let payload = dbft_messages::encode(&completed);

    // Honest copy of the block re-executes to the identical root.
    let honest = FinalizedBlockRound::new(
        block.clone(),
        producers.clone(),
        chain.db(),
        genesis_root,
    );
    assert!(honest.decode_and_validate(&payload).is_ok());

    // A single corrupted byte in one transaction diverges the state root.
    let mut corrupted = block.clone();
    corrupted.data.txs[0].amount += 1;
    let round = FinalizedBlockRound::new(corrupted, producers.clone(), chain.db(), genesis_root);
    let err = round.decode_and_validate(&payload).unwrap_err();
    assert!(matches!(err, ConsensusError::NotMatchedStateRoot));

    // The parent snapshot survives the rollback untouched.
    let parent = TrieStore::at_root(chain.db(), &genesis_root).unwrap();
    assert_eq!(parent.balance(&common::FUNDED), FUNDED_BALANCE);

    // A forged gas figure is caught before the root comparison.
    let mut padded = block.clone();
    padded.header.gas_used += 1;
    let round = FinalizedBlockRound::new(padded, producers, chain.db(), genesis_root);
    assert!(matches!(
        round.decode_and_validate(&payload).unwrap_err(),
        ConsensusError::GasUsed
    ));
}
