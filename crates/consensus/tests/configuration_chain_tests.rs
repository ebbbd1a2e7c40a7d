//! Configuration-chain tests: a single-participant DKG driven end to end,
//! followed by the round-anchor threshold signature.

use lattice_consensus::authenticator::Authenticator;
use lattice_consensus::configuration_chain::{
    hash_round_anchor, ConfigurationChain, ConfigurationChainError,
};
use lattice_consensus::dkg::{DkgReceiver, TsigVerifier};
use lattice_consensus::test_utils::{generate_private_keys, MockGovernance};
use lattice_core::Governance;
use lattice_types::{
    Config, DkgComplaint, DkgFinalize, DkgMasterPublicKey, DkgPrivateShare, NodeId, H256,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Signs outbound messages, forwarding registry traffic to governance and
/// queueing private shares for the test to loop back.
struct LoopbackReceiver {
    auth: Arc<Authenticator>,
    gov: Arc<MockGovernance>,
    shares: Mutex<Vec<DkgPrivateShare>>,
}

impl DkgReceiver for LoopbackReceiver {
    fn propose_complaint(&self, mut complaint: DkgComplaint) {
        self.auth.sign_dkg_complaint(&mut complaint).unwrap();
        self.gov.add_dkg_complaint(complaint);
    }

    fn propose_master_public_key(&self, mut mpk: DkgMasterPublicKey) {
        self.auth.sign_dkg_master_public_key(&mut mpk).unwrap();
        self.gov.add_dkg_master_public_key(mpk);
    }

    fn propose_private_share(&self, mut share: DkgPrivateShare) {
        self.auth.sign_dkg_private_share(&mut share).unwrap();
        self.shares.lock().push(share);
    }

    fn propose_anti_nack_complaint(&self, mut share: DkgPrivateShare) {
        if share.proposer_id == self.auth.id() {
            self.auth.sign_dkg_private_share(&mut share).unwrap();
        }
        self.shares.lock().push(share);
    }

    fn propose_finalize(&self, mut finalize: DkgFinalize) {
        self.auth.sign_dkg_finalize(&mut finalize).unwrap();
        self.gov.add_dkg_finalize(finalize);
    }
}

fn single_node_setup() -> (
    Arc<Authenticator>,
    Arc<MockGovernance>,
    Arc<LoopbackReceiver>,
    Arc<ConfigurationChain>,
    Config,
) {
    let key = generate_private_keys(1).pop().unwrap();
    let auth = Arc::new(Authenticator::new(key.clone()));
    let config = Config {
        dkg_set_size: 1,
        num_chains: 1,
        notary_set_size: 1,
        round_interval: Duration::from_millis(300),
        ..Default::default()
    };
    let gov = Arc::new(MockGovernance::with_keys(
        vec![key.public_key()],
        config.clone(),
        H256::keccak256(b"configuration-chain-tests"),
    ));
    let recv = Arc::new(LoopbackReceiver {
        auth: auth.clone(),
        gov: gov.clone(),
        shares: Mutex::new(Vec::new()),
    });
    let chain = Arc::new(ConfigurationChain::new(
        auth.id(),
        recv.clone() as Arc<dyn DkgReceiver>,
        gov.clone(),
    ));
    (auth, gov, recv, chain, config)
}

#[tokio::test]
async fn test_single_node_dkg_and_anchor_tsig() {
    let (auth, gov, recv, chain, config) = single_node_setup();
    let round = 0u64;
    let threshold = config.dkg_threshold();
    assert_eq!(threshold, 1);

    chain.register_dkg(round, threshold);
    assert_eq!(gov.dkg_master_public_keys(round).len(), 1);

    // Loop self-addressed shares back into the chain while the DKG phases
    // run.
    let pump = {
        let recv = recv.clone();
        let chain = chain.clone();
        tokio::spawn(async move {
            loop {
                let shares: Vec<DkgPrivateShare> = std::mem::take(&mut *recv.shares.lock());
                for share in shares {
                    chain.process_private_share(&share).unwrap();
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
    };

    chain.run_dkg(round).await.unwrap();
    pump.abort();

    assert!(chain.is_dkg_final(round));
    let group_key = chain.group_public_key(round).expect("group key assembled");
    assert!(gov.is_dkg_final(round));

    // Threshold-sign the round anchor with our own partial.
    let anchor = hash_round_anchor(
        &[auth.id()],
        &config,
        chain.prev_anchor(),
        gov.crs(round).unwrap(),
    );
    let mut psig = chain.prepare_partial_signature(round, anchor).unwrap();
    auth.sign_dkg_partial_signature(&mut psig).unwrap();
    // Arriving before the TSIG starts, the partial must be buffered.
    chain.process_partial_signature(&psig).unwrap();

    let signature = chain
        .run_block_tsig(round, anchor, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(group_key.verify_signature(&anchor, &signature));
    assert_eq!(chain.prev_anchor(), anchor);
}

#[tokio::test]
async fn test_run_dkg_requires_registration() {
    let (_auth, _gov, _recv, chain, _config) = single_node_setup();
    assert!(matches!(
        chain.run_dkg(0).await,
        Err(ConfigurationChainError::DkgNotRegistered)
    ));
}

#[tokio::test]
async fn test_tsig_without_group_key_fails() {
    let (_auth, _gov, _recv, chain, _config) = single_node_setup();
    assert!(matches!(
        chain
            .run_tsig(0, H256::keccak256(b"anchor"), Duration::from_millis(50))
            .await,
        Err(ConfigurationChainError::DkgNotReady)
    ));
}

#[tokio::test]
async fn test_partial_signature_missing_signer() {
    let (_auth, _gov, _recv, chain, _config) = single_node_setup();
    assert!(matches!(
        chain.prepare_partial_signature(0, H256::keccak256(b"anchor")),
        Err(ConfigurationChainError::DkgNotReady)
    ));
}

/// The anchor hash is order-insensitive over members but sensitive to every
/// input.
#[test]
fn test_round_anchor_hash() {
    let a = NodeId(H256::keccak256(b"a"));
    let b = NodeId(H256::keccak256(b"b"));
    let config = Config::default();
    let crs = H256::keccak256(b"crs");

    let forward = hash_round_anchor(&[a, b], &config, H256::ZERO, crs);
    let backward = hash_round_anchor(&[b, a], &config, H256::ZERO, crs);
    assert_eq!(forward, backward);

    let other_crs = hash_round_anchor(&[a, b], &config, H256::ZERO, H256::keccak256(b"x"));
    assert_ne!(forward, other_crs);

    let chained = hash_round_anchor(&[a, b], &config, forward, crs);
    assert_ne!(forward, chained);
}
