//! Protocol-engine scenario tests: DKG, signing, derivation and crash
//! replay driven directly against the state machines.

use std::collections::BTreeMap;

use ecdsa::signature::hazmat::PrehashVerifier;
use sha2::{Digest, Sha256};

use crate::error::{AbortKind, CustodyError};
use crate::protocol::{derive, math::secp, EngineInit, Inbound, SchemeEngine};
use crate::tests::harness::{dkg_results, no_tamper, run_engines, sign_results, GG_PRE_PARAMS};
use crate::types::{Curve, LocalShareBundle, PartyIndex, Scheme};

fn party(i: u16) -> PartyIndex {
    PartyIndex(i)
}

fn seed(i: u16) -> [u8; 32] {
    let mut s = [0u8; 32];
    s[0] = i as u8;
    s[31] = 0xa5;
    s
}

fn run_dkg(curve: Curve, scheme: Scheme, n: u16, threshold: u16) -> BTreeMap<u16, LocalShareBundle> {
    let participants: Vec<PartyIndex> = (1..=n).map(party).collect();
    let mut engines = BTreeMap::new();
    let mut initial = Vec::new();
    for i in 1..=n {
        let pre = match scheme {
            Scheme::Frost => None,
            _ => Some(GG_PRE_PARAMS[(i - 1) as usize].clone()),
        };
        let init = EngineInit { seed: seed(i), gg_pre_params: pre };
        let (engine, outbound) =
            SchemeEngine::begin_dkg(curve, scheme, party(i), &participants, threshold, 64, init)
                .unwrap();
        engines.insert(i, engine);
        initial.push((party(i), outbound));
    }

    let results = dkg_results(run_engines(engines, initial, no_tamper).unwrap());
    assert_eq!(results.len(), n as usize);

    // All participants agree on the group key and chain code.
    let reference = &results[&1];
    for result in results.values() {
        assert_eq!(result.group_public_key, reference.group_public_key);
        assert_eq!(result.chain_code, reference.chain_code);
    }
    // Chain code is the documented transcript hash.
    assert_eq!(reference.chain_code, derive::chain_code_for(&reference.group_public_key));

    results.into_iter().map(|(j, r)| (j, r.bundle)).collect()
}

fn run_sign(
    bundles: &BTreeMap<u16, LocalShareBundle>,
    signers: &[u16],
    digest: [u8; 32],
) -> Vec<u8> {
    let signer_set: Vec<PartyIndex> = signers.iter().map(|&i| party(i)).collect();
    let mut engines = BTreeMap::new();
    let mut initial = Vec::new();
    for &i in signers {
        let init = EngineInit { seed: seed(i + 40), gg_pre_params: None };
        let (engine, outbound) = SchemeEngine::begin_sign(
            bundles[&i].clone(),
            digest,
            &signer_set,
            party(i),
            64,
            init,
        )
        .unwrap();
        engines.insert(i, engine);
        initial.push((party(i), outbound));
    }

    let results = sign_results(run_engines(engines, initial, no_tamper).unwrap());
    assert_eq!(results.len(), signers.len());
    let reference = results.values().next().unwrap().signature.clone();
    for result in results.values() {
        assert_eq!(result.signature, reference);
    }
    reference
}

fn verify_ecdsa(public_key: &[u8], digest: &[u8; 32], signature: &[u8]) {
    assert_eq!(signature.len(), 64);
    let sig = k256::ecdsa::Signature::from_slice(signature).unwrap();
    // Canonical low-s: normalisation must be a no-op.
    assert!(sig.normalize_s().is_none(), "signature s is not canonical");
    let key = k256::ecdsa::VerifyingKey::from_sec1_bytes(public_key).unwrap();
    key.verify_prehash(digest, &sig).unwrap();
}

/// E1: 2-of-3 ECDSA (gg20) DKG + sign with {P1, P2}.
#[test]
fn e1_gg20_dkg_then_sign_two_of_three() {
    let bundles = run_dkg(Curve::Secp256k1, Scheme::Gg20, 3, 1);
    let public_key = bundles[&1].group_public_key.clone();

    // Every persisted share satisfies x_i * G == X_i.
    for (i, bundle) in &bundles {
        let x = secp::scalar_from_be(&bundle.x_i.0).unwrap();
        let expected = secp::point_from_bytes(bundle.public_share(party(*i)).unwrap()).unwrap();
        assert_eq!(secp::mul_base(&x), expected);
    }

    let digest: [u8; 32] = Sha256::digest(b"hello threshold").into();
    let signature = run_sign(&bundles, &[1, 2], digest);
    verify_ecdsa(&public_key, &digest, &signature);

    // P3 holds a valid share but was never invoked.
    assert!(bundles.contains_key(&3));
}

/// GG18 produces byte-compatible bundles through its longer DKG.
#[test]
fn gg18_dkg_bundles_are_compatible() {
    let bundles = run_dkg(Curve::Secp256k1, Scheme::Gg18, 3, 1);
    let digest: [u8; 32] = Sha256::digest(b"gg18 message").into();
    let signature = run_sign(&bundles, &[2, 3], digest);
    verify_ecdsa(&bundles[&1].group_public_key, &digest, &signature);
}

/// E2 (engine level): 2-of-3 FROST Ed25519 DKG + sign with {P2, P3}.
#[test]
fn e2_frost_ed25519_subset_sign() {
    let bundles = run_dkg(Curve::Ed25519, Scheme::Frost, 3, 1);
    let digest: [u8; 32] = Sha256::digest(b"hello eddsa").into();
    let signature = run_sign(&bundles, &[2, 3], digest);

    assert_eq!(signature.len(), 64);
    let key_bytes: [u8; 32] = bundles[&1].group_public_key.clone().try_into().unwrap();
    let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).unwrap();
    let sig = ed25519_dalek::Signature::from_bytes(&signature.clone().try_into().unwrap());
    ed25519_dalek::Verifier::verify(&key, &digest, &sig).unwrap();
}

/// FROST on secp256k1 yields 64-byte BIP340 signatures under the x-only key.
#[test]
fn frost_secp256k1_bip340_sign() {
    let bundles = run_dkg(Curve::Secp256k1, Scheme::Frost, 3, 1);
    let digest: [u8; 32] = Sha256::digest(b"taproot spend").into();
    let signature = run_sign(&bundles, &[1, 3], digest);

    assert_eq!(signature.len(), 64);
    let group = bundles[&1].group_public_key.clone();
    assert_eq!(group.len(), 33);
    // Normalised bundles always carry an even-Y group key.
    assert_eq!(group[0], 0x02);
    let key = k256::schnorr::VerifyingKey::from_bytes(&group[1..]).unwrap();
    let sig = k256::schnorr::Signature::try_from(signature.as_slice()).unwrap();
    key.verify_raw(&digest, &sig).unwrap();
}

/// E3: non-hardened derivation then signing under the derived key.
#[test]
fn e3_derive_then_sign() {
    let bundles = run_dkg(Curve::Secp256k1, Scheme::Gg20, 3, 1);
    let root = &bundles[&1];
    let chain_code = derive::chain_code_for(&root.group_public_key);
    let path = derive::parse_path("m/0").unwrap();

    let mut derived = BTreeMap::new();
    let mut child_keys = Vec::new();
    for (&i, bundle) in &bundles {
        let (child, child_code) = derive::derive_bundle(bundle, &chain_code, &path).unwrap();
        // Property 1 after each derivation step.
        let x = secp::scalar_from_be(&child.x_i.0).unwrap();
        let expected = secp::point_from_bytes(child.public_share(party(i)).unwrap()).unwrap();
        assert_eq!(secp::mul_base(&x), expected);
        child_keys.push((child.group_public_key.clone(), child_code));
        derived.insert(i, child);
    }
    // All participants derived the same child public key.
    for (key, code) in &child_keys {
        assert_eq!(*key, child_keys[0].0);
        assert_eq!(*code, child_keys[0].1);
    }
    // And it matches the public-only derivation P' = P + il*G.
    let (expected_pk, _) =
        derive::derive_public(Curve::Secp256k1, &root.group_public_key, &chain_code, &path)
            .unwrap();
    assert_eq!(child_keys[0].0, expected_pk);

    let digest: [u8; 32] = Sha256::digest(b"hello derived").into();
    let signature = run_sign(&derived, &[1, 2], digest);
    verify_ecdsa(&expected_pk, &digest, &signature);
}

/// A corrupted VSS share names the sender.
#[test]
fn gg_dkg_flags_malicious_share() {
    let participants: Vec<PartyIndex> = (1..=3).map(party).collect();
    let mut engines = BTreeMap::new();
    let mut initial = Vec::new();
    for i in 1..=3u16 {
        let init = EngineInit {
            seed: seed(i),
            gg_pre_params: Some(GG_PRE_PARAMS[(i - 1) as usize].clone()),
        };
        let (engine, outbound) = SchemeEngine::begin_dkg(
            Curve::Secp256k1,
            Scheme::Gg20,
            party(i),
            &participants,
            1,
            64,
            init,
        )
        .unwrap();
        engines.insert(i, engine);
        initial.push((party(i), outbound));
    }

    // Flip bits in every unicast share P3 receives.
    let err = run_engines(engines, initial, |recipient, payload| {
        if recipient == party(3) && payload.len() < 64 {
            if let Some(byte) = payload.last_mut() {
                *byte ^= 0x55;
            }
        }
    })
    .unwrap_err();
    match err {
        CustodyError::Protocol(abort) => {
            assert!(matches!(
                abort.kind,
                AbortKind::MaliciousPeer | AbortKind::InconsistentCommitment
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

/// Signing rejects a tampered bundle at entry (`InconsistentShare`).
#[test]
fn sign_rejects_inconsistent_share() {
    let bundles = run_dkg(Curve::Ed25519, Scheme::Frost, 3, 1);
    let mut bundle = bundles[&1].clone();
    bundle.x_i.0[0] ^= 0xff;

    let err = SchemeEngine::begin_sign(
        bundle,
        [9u8; 32],
        &[party(1), party(2)],
        party(1),
        64,
        EngineInit { seed: seed(1), gg_pre_params: None },
    )
    .unwrap_err();
    match err {
        CustodyError::Protocol(abort) => assert_eq!(abort.kind, AbortKind::InconsistentShare),
        other => panic!("unexpected error: {other}"),
    }
}

/// E6 (engine level): rebuilding a mid-protocol engine from its recorded
/// seed and inbound messages reproduces its state byte for byte, and the
/// flow completes.
#[test]
fn e6_engine_replay_after_crash() {
    let bundles = run_dkg(Curve::Ed25519, Scheme::Frost, 3, 1);
    let signer_set = [party(1), party(2)];
    let digest: [u8; 32] = Sha256::digest(b"replayed").into();

    let init1 = EngineInit { seed: seed(71), gg_pre_params: None };
    let init2 = EngineInit { seed: seed(72), gg_pre_params: None };

    let (mut p1, out1) = SchemeEngine::begin_sign(
        bundles[&1].clone(),
        digest,
        &signer_set,
        party(1),
        64,
        init1.clone(),
    )
    .unwrap();
    let (mut p2, out2) = SchemeEngine::begin_sign(
        bundles[&2].clone(),
        digest,
        &signer_set,
        party(2),
        64,
        init2,
    )
    .unwrap();

    // Deliver P2's round-1 commitment to P1; this is the point where P1
    // "crashes": its WAL holds the init record and one inbound message.
    let recorded = Inbound {
        from: party(2),
        round: out2[0].round,
        sequence: 0,
        payload: out2[0].payload.clone(),
    };
    let live_output = p1.handle(recorded.clone()).unwrap();

    // Restart: same seed, same inbound, byte-identical outbound.
    let (mut p1_replayed, out1_replayed) = SchemeEngine::begin_sign(
        bundles[&1].clone(),
        digest,
        &signer_set,
        party(1),
        64,
        init1,
    )
    .unwrap();
    assert_eq!(out1[0].payload, out1_replayed[0].payload);
    let replay_output = p1_replayed.handle(recorded).unwrap();
    let live: Vec<_> = live_output.outbound.iter().map(|o| o.payload.clone()).collect();
    let replayed: Vec<_> = replay_output.outbound.iter().map(|o| o.payload.clone()).collect();
    assert_eq!(live, replayed);

    // Resume the flow: P2 receives P1's re-sent round-1 commitment, then
    // the replayed round-2 share.
    let mut p1_sig = None;
    let mut p2_sig = None;
    let mut to_p1 = Vec::new();

    let out = p2
        .handle(Inbound {
            from: party(1),
            round: out1_replayed[0].round,
            sequence: 0,
            payload: out1_replayed[0].payload.clone(),
        })
        .unwrap();
    to_p1.extend(out.outbound);
    if let Some(crate::protocol::ProtocolResult::Sign(sign)) = out.result {
        p2_sig = Some(sign.signature);
    }

    let share = &replay_output.outbound[0];
    let out = p2
        .handle(Inbound {
            from: party(1),
            round: share.round,
            sequence: 1,
            payload: share.payload.clone(),
        })
        .unwrap();
    to_p1.extend(out.outbound);
    if let Some(crate::protocol::ProtocolResult::Sign(sign)) = out.result {
        p2_sig = Some(sign.signature);
    }

    let mut sequence = 1u32;
    for message in to_p1 {
        let fin = p1_replayed
            .handle(Inbound {
                from: party(2),
                round: message.round,
                sequence,
                payload: message.payload,
            })
            .unwrap();
        sequence += 1;
        if let Some(crate::protocol::ProtocolResult::Sign(sign)) = fin.result {
            p1_sig = Some(sign.signature);
        }
    }

    let signature = p1_sig.expect("replayed signer completed");
    assert_eq!(Some(&signature), p2_sig.as_ref());
    let key_bytes: [u8; 32] = bundles[&1].group_public_key.clone().try_into().unwrap();
    let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).unwrap();
    let sig = ed25519_dalek::Signature::from_bytes(&signature.try_into().unwrap());
    ed25519_dalek::Verifier::verify(&key, &digest, &sig).unwrap();
}
