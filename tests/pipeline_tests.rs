mod common;

use std::time::Duration;

use channel_digest::audit::AccessControl;
use channel_digest::core::models::{Candidate, ForwardOrigin, Session, SessionState};
use channel_digest::errors::DigestError;
use channel_digest::session::SessionStore;

use common::{
    CHANNEL_A, CHANNEL_B, FakeModel, FakeModerator, GROUPED_5_7, Harness, Reply, USER, forward,
};

async fn collect(h: &Harness, ids: &[i64]) {
    h.collector.start(USER).await.unwrap();
    for id in ids {
        h.collector
            .submit(USER, &forward(CHANNEL_A, *id, &format!("post {id}")))
            .await
            .unwrap();
    }
}

async fn session(h: &Harness) -> Session {
    h.store.snapshot(USER).await.unwrap()
}

#[tokio::test]
async fn test_submit_without_session_is_rejected() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));

    let result = h.collector.submit(USER, &forward(CHANNEL_A, 5, "hi")).await;
    assert_eq!(result, Err(DigestError::NoActiveSession));
    assert_eq!(session(&h).await, Session::default());
    assert_eq!(h.directory.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_submit_after_cancel_is_rejected() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5]).await;
    h.collector.cancel(USER).await.unwrap();

    let result = h.collector.submit(USER, &forward(CHANNEL_A, 7, "hi")).await;
    assert_eq!(result, Err(DigestError::NoActiveSession));
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_submit_after_finish_is_rejected() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5, 7]).await;
    h.summarizer.finish(USER).await.unwrap();

    let result = h.collector.submit(USER, &forward(CHANNEL_A, 9, "late")).await;
    assert_eq!(result, Err(DigestError::NoActiveSession));
}

#[tokio::test]
async fn test_first_submit_locks_channel_and_counts() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    h.collector.start(USER).await.unwrap();

    let first = h
        .collector
        .submit(USER, &forward(CHANNEL_A, 5, "one"))
        .await
        .unwrap();
    assert!(first.first);
    assert_eq!(first.count, 1);
    assert_eq!(first.channel.id, CHANNEL_A);
    assert_eq!(first.message_id, 5);

    let second = h
        .collector
        .submit(USER, &forward(CHANNEL_A, 7, "two"))
        .await
        .unwrap();
    assert!(!second.first);
    assert_eq!(second.count, 2);

    let state = session(&h).await;
    assert_eq!(state.state, SessionState::Collecting);
    assert_eq!(state.channel.map(|c| c.id), Some(CHANNEL_A));
}

#[tokio::test]
async fn test_second_channel_is_rejected_without_mutation() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5]).await;

    let result = h.collector.submit(USER, &forward(CHANNEL_B, 6, "other")).await;
    assert_eq!(result, Err(DigestError::ChannelMismatch));

    let state = session(&h).await;
    assert_eq!(state.channel.map(|c| c.id), Some(CHANNEL_A));
    let ids: Vec<i64> = state.messages.iter().map(|m| m.message_id).collect();
    assert_eq!(ids, vec![5]);
}

#[tokio::test]
async fn test_channel_metadata_is_fetched_once_per_session() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[1, 2, 3]).await;
    assert_eq!(h.directory.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_content_and_origin_are_validated() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    h.collector.start(USER).await.unwrap();

    let photo_only = Candidate {
        text: None,
        caption: None,
        origin: ForwardOrigin::Channel {
            chat_id: CHANNEL_A,
            message_id: 5,
        },
    };
    assert_eq!(
        h.collector.submit(USER, &photo_only).await,
        Err(DigestError::UnsupportedContent)
    );

    let from_user = Candidate {
        text: Some("hello".into()),
        caption: None,
        origin: ForwardOrigin::User,
    };
    assert_eq!(
        h.collector.submit(USER, &from_user).await,
        Err(DigestError::InvalidOrigin)
    );

    let state = session(&h).await;
    assert!(state.channel.is_none());
    assert!(state.messages.is_empty());
}

#[tokio::test]
async fn test_caption_is_collected_when_text_is_missing() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    h.collector.start(USER).await.unwrap();
    let captioned = Candidate {
        text: None,
        caption: Some("photo caption".into()),
        origin: ForwardOrigin::Channel {
            chat_id: CHANNEL_A,
            message_id: 5,
        },
    };
    h.collector.submit(USER, &captioned).await.unwrap();
    assert_eq!(session(&h).await.messages[0].text, "photo caption");
}

#[tokio::test]
async fn test_start_requires_whitelist_when_limited() {
    let h = Harness::build(
        FakeModel::answering(GROUPED_5_7),
        None,
        Duration::from_secs(3600),
        true,
    );
    assert_eq!(h.collector.start(USER).await, Err(DigestError::Unauthorized));
    assert!(!session(&h).await.is_collecting());

    assert!(h.audit.grant_first_user(USER).await.unwrap());
    h.collector.start(USER).await.unwrap();
    assert!(session(&h).await.is_collecting());
}

#[tokio::test]
async fn test_start_again_discards_the_batch() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5, 7]).await;
    h.collector.start(USER).await.unwrap();

    let state = session(&h).await;
    assert!(state.is_collecting());
    assert!(state.channel.is_none());
    assert!(state.messages.is_empty());
}

#[tokio::test]
async fn test_finish_on_empty_batch_keeps_collecting() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    h.collector.start(USER).await.unwrap();

    assert_eq!(h.summarizer.finish(USER).await, Err(DigestError::EmptyBatch));
    assert!(session(&h).await.is_collecting());
    assert_eq!(h.model.calls().await, 0);
}

#[tokio::test]
async fn test_finish_without_session() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    assert_eq!(
        h.summarizer.finish(USER).await,
        Err(DigestError::NoActiveSession)
    );
}

#[tokio::test]
async fn test_well_formed_response_renders_grouped_links() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5, 7]).await;

    let digest = h.summarizer.finish(USER).await.unwrap();
    assert_eq!(
        digest.text,
        "• *T*\n\n- [t1](https://t.me/c/1234567890/5)\n- [t2](https://t.me/c/1234567890/7)"
    );
    assert_eq!(digest.tokens_spent, 120);
    assert_eq!(session(&h).await, Session::default());

    let records = h.audit.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].user_id, USER);
    assert_eq!(records[0].target_channel_id, CHANNEL_A);
    assert_eq!(records[0].tokens_spent, 120);
}

#[tokio::test]
async fn test_prompt_carries_batch_and_channel() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5, 7]).await;
    h.summarizer.finish(USER).await.unwrap();

    let requests = h.model.requests.lock().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(
        requests[0].payload,
        r#"[{"text":"post 5","id":5},{"text":"post 7","id":7}]"#
    );
    assert!(requests[0].system.contains(&format!("Channel Title: Channel {CHANNEL_A}")));
    assert_eq!(requests[0].user, USER.to_string());
}

#[tokio::test]
async fn test_malformed_response_clears_session() {
    for content in ["this is not json", r#"{"groups":[]}"#] {
        let h = Harness::new(FakeModel::answering(content));
        collect(&h, &[5]).await;

        let result = h.summarizer.finish(USER).await;
        assert!(
            matches!(result, Err(DigestError::MalformedResponse(_))),
            "{content} should be malformed"
        );
        assert_eq!(session(&h).await, Session::default());
        assert!(h.audit.records().await.is_empty());
    }
}

#[tokio::test]
async fn test_missing_content_is_malformed() {
    let h = Harness::new(FakeModel::with(Reply::Content(None, Some(10))));
    collect(&h, &[5]).await;
    assert!(matches!(
        h.summarizer.finish(USER).await,
        Err(DigestError::MalformedResponse(_))
    ));
}

#[tokio::test]
async fn test_empty_result_clears_session_without_audit() {
    let h = Harness::new(FakeModel::answering(r#"{"result":[]}"#));
    collect(&h, &[5]).await;

    assert_eq!(h.summarizer.finish(USER).await, Err(DigestError::EmptySummary));
    assert_eq!(session(&h).await, Session::default());
    assert!(h.audit.records().await.is_empty());
}

#[tokio::test]
async fn test_rendered_ids_are_subset_of_input() {
    let h = Harness::new(FakeModel::answering(
        r#"{"result":[{"title":"A","messages":[{"title":"real","id":5},{"title":"invented","id":99}]},{"title":"B","messages":[{"title":"ghost","id":100}]}]}"#,
    ));
    collect(&h, &[5, 7]).await;

    let digest = h.summarizer.finish(USER).await.unwrap();
    assert!(digest.text.contains("/5)"));
    assert!(!digest.text.contains("/99)"));
    assert!(!digest.text.contains("ghost"));
    assert_eq!(digest.groups.len(), 1);
    for group in &digest.groups {
        for item in &group.messages {
            assert!([5, 7].contains(&item.id));
        }
    }
}

#[tokio::test]
async fn test_only_invented_ids_is_empty_summary() {
    let h = Harness::new(FakeModel::answering(
        r#"{"result":[{"title":"A","messages":[{"title":"invented","id":99}]}]}"#,
    ));
    collect(&h, &[5]).await;
    assert_eq!(h.summarizer.finish(USER).await, Err(DigestError::EmptySummary));
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_context_overflow_clears_session() {
    let h = Harness::new(FakeModel::with(Reply::ContextLength));
    collect(&h, &[5]).await;

    assert_eq!(h.summarizer.finish(USER).await, Err(DigestError::BatchTooLarge));
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_model_failure_keeps_session_for_retry() {
    let h = Harness::new(FakeModel::with(Reply::Failure));
    collect(&h, &[5, 7]).await;

    assert!(matches!(
        h.summarizer.finish(USER).await,
        Err(DigestError::ModelUnavailable(_))
    ));
    let state = session(&h).await;
    assert!(state.is_collecting());
    assert_eq!(state.messages.len(), 2);
}

#[tokio::test]
async fn test_model_timeout_keeps_session() {
    let h = Harness::new(FakeModel::with(Reply::Hang));
    collect(&h, &[5]).await;

    assert!(matches!(
        h.summarizer.finish(USER).await,
        Err(DigestError::ModelUnavailable(_))
    ));
    assert!(session(&h).await.is_collecting());
}

#[tokio::test]
async fn test_moderation_excludes_flagged_messages() {
    let moderator = FakeModerator {
        flagged: ["post 7".to_string()].into_iter().collect(),
        broken: false,
    };
    let h = Harness::build(
        FakeModel::answering(GROUPED_5_7),
        Some(moderator),
        Duration::from_secs(3600),
        false,
    );
    collect(&h, &[5, 7]).await;

    let digest = h.summarizer.finish(USER).await.unwrap();
    let requests = h.model.requests.lock().await;
    assert_eq!(requests[0].payload, r#"[{"text":"post 5","id":5}]"#);
    // 7 was flagged, so the model cannot reference it.
    assert!(!digest.text.contains("/7)"));
}

#[tokio::test]
async fn test_everything_flagged_skips_the_model() {
    let moderator = FakeModerator {
        flagged: ["post 5".to_string()].into_iter().collect(),
        broken: false,
    };
    let h = Harness::build(
        FakeModel::answering(GROUPED_5_7),
        Some(moderator),
        Duration::from_secs(3600),
        false,
    );
    collect(&h, &[5]).await;

    assert_eq!(h.summarizer.finish(USER).await, Err(DigestError::EmptySummary));
    assert_eq!(h.model.calls().await, 0);
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_moderation_error_keeps_session() {
    let moderator = FakeModerator {
        flagged: Default::default(),
        broken: true,
    };
    let h = Harness::build(
        FakeModel::answering(GROUPED_5_7),
        Some(moderator),
        Duration::from_secs(3600),
        false,
    );
    collect(&h, &[5, 7]).await;

    assert!(matches!(
        h.summarizer.finish(USER).await,
        Err(DigestError::ModelUnavailable(_))
    ));
    assert_eq!(h.model.calls().await, 0);
    assert_eq!(session(&h).await.messages.len(), 2);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    h.collector.cancel(USER).await.unwrap();
    collect(&h, &[5]).await;
    h.collector.cancel(USER).await.unwrap();
    h.collector.cancel(USER).await.unwrap();
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_expired_session_behaves_like_cancel() {
    let h = Harness::build(
        FakeModel::answering(GROUPED_5_7),
        None,
        Duration::from_millis(30),
        false,
    );
    collect(&h, &[5]).await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    assert_eq!(session(&h).await, Session::default());
    assert_eq!(
        h.collector.submit(USER, &forward(CHANNEL_A, 7, "late")).await,
        Err(DigestError::NoActiveSession)
    );
    assert_eq!(
        h.summarizer.finish(USER).await,
        Err(DigestError::NoActiveSession)
    );
}

#[tokio::test]
async fn test_users_do_not_share_sessions() {
    let h = Harness::new(FakeModel::answering(GROUPED_5_7));
    collect(&h, &[5]).await;

    let other = USER + 1;
    assert_eq!(
        h.collector.submit(other, &forward(CHANNEL_B, 1, "x")).await,
        Err(DigestError::NoActiveSession)
    );
    h.collector.start(other).await.unwrap();
    h.collector
        .submit(other, &forward(CHANNEL_B, 1, "x"))
        .await
        .unwrap();

    assert_eq!(session(&h).await.channel.map(|c| c.id), Some(CHANNEL_A));
}

fn slow_model() -> FakeModel {
    FakeModel::with(Reply::Slow(Duration::from_millis(100), GROUPED_5_7.to_string()))
}

#[tokio::test]
async fn test_concurrent_finish_consumes_batch_once() {
    let h = Harness::new(slow_model());
    collect(&h, &[5, 7]).await;

    let (first, second) = tokio::join!(h.summarizer.finish(USER), h.summarizer.finish(USER));

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.contains(&Err(DigestError::SummaryInProgress)));
    assert_eq!(h.model.calls().await, 1);
    assert_eq!(h.audit.records().await.len(), 1);
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_submit_during_summary_is_rejected() {
    let h = Harness::new(slow_model());
    collect(&h, &[5, 7]).await;

    let late = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.collector
            .submit(USER, &forward(CHANNEL_A, 9, "late post"))
            .await
    };
    let (digest, late) = tokio::join!(h.summarizer.finish(USER), late);

    assert_eq!(late, Err(DigestError::SummaryInProgress));
    assert!(digest.is_ok());
    assert_eq!(session(&h).await, Session::default());
}

#[tokio::test]
async fn test_failed_summary_reopens_collection() {
    let h = Harness::new(FakeModel::with(Reply::Failure));
    collect(&h, &[5]).await;
    assert!(h.summarizer.finish(USER).await.is_err());

    let outcome = h
        .collector
        .submit(USER, &forward(CHANNEL_A, 7, "post 7"))
        .await
        .unwrap();
    assert_eq!(outcome.count, 2);
    assert!(!outcome.first);
}

#[tokio::test]
async fn test_restart_during_summary_keeps_new_session() {
    let h = Harness::new(slow_model());
    collect(&h, &[5, 7]).await;

    let restart = async {
        tokio::time::sleep(Duration::from_millis(30)).await;
        h.collector.start(USER).await
    };
    let (digest, restarted) = tokio::join!(h.summarizer.finish(USER), restart);

    assert!(digest.is_ok());
    assert_eq!(restarted, Ok(()));
    let state = session(&h).await;
    assert!(state.is_collecting());
    assert!(state.messages.is_empty());
}
