//! Races, outages and stale participants

#![allow(clippy::expect_used, clippy::unwrap_used, missing_docs)]

use assert_matches::assert_matches;
use std::sync::Arc;
use tictac_consensus::{
    CommitOutcome, CommitReceipt, FinalityAck, FinalityNotice, GameService, InMemoryAuthority,
    KeyDirectory, LineageHead, ParticipantKeys, ParticipantNode, Proposal, SessionRouter,
    SignedProposal, SignedTransition, SyncOutcome, UniquenessAuthority,
};
use tictac_core::{ErrorClass, LineageId, StateRecord, TictacError, Transition, ValidationError};
use tictac_store::{LocalStateStore, MemoryStateStore};
use tictac_testkit::*;

fn endorsed(
    transition: &Transition,
    initiator: &ParticipantKeys,
    counterparty: &ParticipantKeys,
    nonce: u64,
) -> SignedTransition {
    let proposal = Proposal::from_transition(transition, initiator.id(), nonce);
    let signed = SignedProposal::sign(proposal, initiator).unwrap();
    let id = signed.id().unwrap();
    SignedTransition {
        proposal: signed.proposal,
        endorsements: vec![signed.initiator_endorsement, counterparty.endorse(id)],
    }
}

#[tokio::test]
async fn two_moves_on_one_version_commit_once() {
    let alice_keys = keys_for(alice(), 1);
    let bob_keys = keys_for(bob(), 2);
    let directory = KeyDirectory::new();
    directory.register(alice_keys.id(), alice_keys.verifying_key());
    directory.register(bob_keys.id(), bob_keys.verifying_key());
    let authority = InMemoryAuthority::new(directory);

    let opened = StateRecord::open(LineageId::new(), alice(), bob());
    let open = Transition::Open {
        proposed: opened.clone(),
    };
    let open_artifact = endorsed(&open, &alice_keys, &bob_keys, 0);
    assert_matches!(
        authority
            .commit_if_unconsumed(open_artifact.proposal.prior_version, &open_artifact)
            .await,
        Ok(CommitOutcome::Committed(_))
    );

    let left = Transition::Move {
        prior: opened.clone(),
        proposed: opened.propose_move(alice(), 0, 0).unwrap(),
    };
    let right = Transition::Move {
        prior: opened.clone(),
        proposed: opened.propose_move(alice(), 2, 2).unwrap(),
    };
    let left = endorsed(&left, &alice_keys, &bob_keys, 1);
    let right = endorsed(&right, &alice_keys, &bob_keys, 2);

    let version = opened.version_key();
    let (first, second) = tokio::join!(
        authority.commit_if_unconsumed(version, &left),
        authority.commit_if_unconsumed(version, &right)
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    let committed: Vec<_> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            CommitOutcome::Committed(receipt) => Some(receipt.proposal_id),
            CommitOutcome::Conflict { .. } => None,
        })
        .collect();
    assert_eq!(committed.len(), 1);
    assert!(outcomes.iter().any(|outcome| matches!(
        outcome,
        CommitOutcome::Conflict { version_key, consumed_by }
            if *version_key == version && *consumed_by == committed[0]
    )));

    // The winner resubmitted is a conflict too.
    let winner = if committed[0] == left.id().unwrap() {
        &left
    } else {
        &right
    };
    assert_matches!(
        authority.commit_if_unconsumed(version, winner).await,
        Ok(CommitOutcome::Conflict { .. })
    );
    assert_eq!(authority.audit_log().len(), 2);
}

#[tokio::test]
async fn racing_devices_of_one_owner_leave_one_successor() {
    init_tracing();
    let service = GameService::builder()
        .with_keys(keys_for(alice(), 1))
        .with_keys(keys_for(bob(), 2))
        .build()
        .unwrap();
    let lineage = service.open_game(alice(), bob()).await.unwrap();

    // A second device for alice, holding its own copy of the game.
    let device = ParticipantNode::start(
        keys_for(alice(), 1),
        Arc::new(MemoryStateStore::new()),
        service.router().clone(),
        service.directory().clone(),
        service.authority().clone(),
        service.config().clone(),
    );
    assert_matches!(device.sync(lineage).await, Ok(SyncOutcome::Updated(_)));

    let primary = service.node(alice()).unwrap();
    let (left, right) = tokio::join!(
        primary.submit_move(lineage, 0, 0),
        device.submit_move(lineage, 2, 2)
    );
    let (winner, loser) = match (left, right) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        (left, right) => panic!("expected exactly one commit, got {left:?} and {right:?}"),
    };
    assert_matches!(
        loser,
        TictacError::Conflict { .. } | TictacError::SessionRejected { .. }
    );

    let committed = winner.record().cloned().unwrap();
    assert_eq!(
        service.authority().record_of_truth(lineage).await.unwrap(),
        Some(LineageHead::Current(committed.clone()))
    );
    let bob_copy = service
        .node(bob())
        .unwrap()
        .store()
        .current_of(lineage)
        .await
        .unwrap();
    assert_eq!(bob_copy, Some(committed));
}

#[tokio::test]
async fn silent_counterparty_times_out() {
    let service = fast_service_for(&[alice()]);
    let silent = SilentParticipant::join(&service, bob(), 2);

    let err = service.open_game(alice(), silent.id()).await.unwrap_err();
    assert_matches!(
        err,
        TictacError::CounterpartyUnresponsive { participant, timeout_ms: 200 }
            if participant == bob()
    );
    assert_eq!(err.class(), ErrorClass::Protocol);
    assert!(err.is_retryable());
    assert!(silent.has_pending());
    assert_matches!(
        service.current_game(alice()).await,
        Err(TictacError::NotFound { .. })
    );
}

#[tokio::test]
async fn offline_counterparty_is_unavailable() {
    let service = service_for(&[alice(), bob()]);
    let lineage = service.open_game(alice(), bob()).await.unwrap();

    service.disconnect(bob()).unwrap();
    assert!(!service.node(bob()).unwrap().is_online());
    let err = service.submit_move(lineage, alice(), 0, 0).await.unwrap_err();
    assert_matches!(
        err,
        TictacError::SessionUnavailable { participant, .. } if participant == bob()
    );
    assert_eq!(service.current_game(alice()).await.unwrap().sequence, 0);
    assert_eq!(service.current_game(bob()).await.unwrap().sequence, 0);

    service.reconnect(bob()).unwrap();
    let record = service.submit_move(lineage, alice(), 0, 0).await.unwrap();
    assert_stores_hold(&service, &[alice(), bob()], &record).await;
}

#[tokio::test]
async fn stale_participant_resyncs_from_authority() {
    init_tracing();
    let router = SessionRouter::new();
    let directory = KeyDirectory::new();
    let authority = PartitionOnCommit::new(directory.clone(), router.clone());
    let service = GameService::builder()
        .with_config(fast_config())
        .with_router(router)
        .with_directory(directory)
        .with_authority(authority.clone())
        .participants([alice(), bob()])
        .build()
        .unwrap();
    let lineage = service.open_game(alice(), bob()).await.unwrap();

    authority.sever_after_next_commit(bob());
    let committed = service
        .node(alice())
        .unwrap()
        .submit_move(lineage, 0, 0)
        .await
        .unwrap();
    assert_eq!(committed.report.delivered, vec![alice()]);
    assert_eq!(committed.report.stale, vec![bob()]);
    assert!(!committed.report.is_complete());

    // Bob still sees alice to move.
    let stale = service.current_game(bob()).await.unwrap();
    assert_eq!(stale.sequence, 0);
    assert_matches!(
        service.submit_move(lineage, bob(), 1, 1).await,
        Err(TictacError::Validation(ValidationError::NotYourTurn { .. }))
    );

    service.reconnect(bob()).unwrap();
    let head = committed.record().cloned().unwrap();
    assert_eq!(
        service.sync_game(lineage, bob()).await.unwrap(),
        SyncOutcome::Updated(head.clone())
    );
    assert_stores_hold(&service, &[alice(), bob()], &head).await;

    let next = service.submit_move(lineage, bob(), 1, 1).await.unwrap();
    assert_eq!(next.sequence, 2);
    assert_eq!(authority.inner().audit_log().len(), 3);
}

#[tokio::test]
async fn authority_outage_persists_nothing() {
    let directory = KeyDirectory::new();
    let authority = Arc::new(InMemoryAuthority::new(directory.clone()));
    let service = GameService::builder()
        .with_directory(directory)
        .with_authority(authority.clone())
        .participants([alice(), bob()])
        .build()
        .unwrap();
    let lineage = service.open_game(alice(), bob()).await.unwrap();

    authority.set_available(false);
    let err = service.submit_move(lineage, alice(), 0, 0).await.unwrap_err();
    assert_matches!(err, TictacError::AuthorityUnavailable { .. });
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(service.current_game(alice()).await.unwrap().sequence, 0);
    assert_eq!(service.current_game(bob()).await.unwrap().sequence, 0);

    // A fresh proposal for the same move goes through once the authority is back.
    authority.set_available(true);
    let record = service.submit_move(lineage, alice(), 0, 0).await.unwrap();
    assert_eq!(record.sequence, 1);
}

#[tokio::test]
async fn close_requires_a_hosted_owner() {
    let service = service_for(&[alice(), bob()]);
    assert_matches!(
        service.close_game(LineageId::new()).await,
        Err(TictacError::NotFound { .. })
    );

    let lineage = service.open_game(alice(), bob()).await.unwrap();
    play(&service, lineage, alice(), bob(), &COLUMN_WIN).await;
    service.close_game(lineage).await.unwrap();
    assert_matches!(
        service.close_game(lineage).await,
        Err(TictacError::NotFound { .. })
    );
    assert_matches!(
        service.sync_game(lineage, bob()).await,
        Ok(SyncOutcome::Retired)
    );
}

#[tokio::test]
async fn concurrent_opens_for_one_participant_leave_one_game() {
    init_tracing();
    let service = service_for(&[alice(), bob(), carol()]);
    let (left, right) = tokio::join!(
        service.open_game(alice(), bob()),
        service.open_game(carol(), bob())
    );
    let (winner, loser, err) = match (left, right) {
        (Ok(winner), Err(err)) => (winner, carol(), err),
        (Err(err), Ok(winner)) => (winner, alice(), err),
        (left, right) => panic!("expected exactly one open, got {left:?} and {right:?}"),
    };
    assert_matches!(
        err,
        TictacError::Validation(ValidationError::AlreadyInGame { participant, lineage })
            if participant == bob() && lineage == winner
    );

    assert_eq!(service.current_game(bob()).await.unwrap().id, winner);
    assert_matches!(
        service.current_game(loser).await,
        Err(TictacError::NotFound { .. })
    );
    assert_matches!(
        service.sync_game(winner, bob()).await,
        Ok(SyncOutcome::AlreadyCurrent(_))
    );

    // The loser is free to start another game once bob's is over.
    let first = service.current_game(bob()).await.unwrap().owner_a;
    play(&service, winner, first, bob(), &COLUMN_WIN).await;
    service.close_game(winner).await.unwrap();
    service.open_game(loser, bob()).await.unwrap();
}

#[tokio::test]
async fn uncommitted_finality_is_refused() {
    let alice_keys = keys_for(alice(), 1);
    let bob_keys = keys_for(bob(), 2);
    let service = GameService::builder()
        .with_keys(keys_for(alice(), 1))
        .with_keys(keys_for(bob(), 2))
        .build()
        .unwrap();
    let lineage = service.open_game(alice(), bob()).await.unwrap();
    let opened = service.current_game(bob()).await.unwrap();

    // Genuine signatures on a move the authority never saw.
    let unseen = Transition::Move {
        prior: opened.clone(),
        proposed: opened.propose_move(alice(), 0, 0).unwrap(),
    };
    let artifact = endorsed(&unseen, &alice_keys, &bob_keys, 7);
    let receipt = CommitReceipt {
        proposal_id: artifact.id().unwrap(),
        lineage,
        consumed: opened.version_key(),
        produced: artifact.proposal.produced_version(),
        position: 1,
    };
    let session = service.router().open_session(alice(), bob()).unwrap();
    let ack = session
        .finalize(
            FinalityNotice { artifact, receipt },
            service.config().finality_timeout(),
        )
        .await
        .unwrap();
    assert_matches!(ack, FinalityAck::Failed { .. });
    assert_eq!(service.current_game(bob()).await.unwrap(), opened);
    assert_eq!(
        service
            .authority()
            .consumed_by(opened.version_key())
            .await
            .unwrap(),
        None
    );

    // The real game carries on from the untouched version.
    let record = service.submit_move(lineage, alice(), 2, 2).await.unwrap();
    assert_eq!(record.sequence, 1);
    assert_stores_hold(&service, &[alice(), bob()], &record).await;
}
