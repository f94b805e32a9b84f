//! Reclamation integration tests.
//!
//! Conferences are backdated through the store so the retention window can
//! be crossed without waiting.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::Duration;
use common::types::ConferenceId;
use conference_service::models::{Camera, DeviceConfiguration, GridSize, MessageDraft, Participant};
use conference_service::services::ReclaimReport;
use cs_test_utils::TestContext;

fn one_camera(conference_id: &ConferenceId, user_name: &str) -> DeviceConfiguration {
    DeviceConfiguration {
        conference_id: conference_id.clone(),
        user_name: user_name.to_string(),
        microphone_id: Some("mic".to_string()),
        microphone_label: None,
        cameras: vec![Camera {
            device_id: "cam".to_string(),
            label: "Camera".to_string(),
            order: 0,
        }],
        grid: GridSize { rows: 1, cols: 1 },
    }
}

#[tokio::test]
async fn test_reclaim_cascades_to_dependents() -> Result<(), anyhow::Error> {
    let ctx = TestContext::new();
    let ann = ctx.temporary("Ann").await;
    let bob = ctx.permanent("Bob Builder", "bob@example.com").await;
    let old = ctx
        .aged_conference("old-conference", Duration::days(45), &[&ann, &bob])
        .await;

    ctx.state.devices.save(&one_camera(&old, "Ann")).await?;
    let chat = ctx.state.chats.ensure_conference_chat(&old, bob.id).await?;
    ctx.state
        .chats
        .send(chat.id, MessageDraft::text("anyone here?"), &bob)
        .await?;

    let report = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(
        report,
        ReclaimReport {
            conferences_reclaimed: 1,
            skipped_active: 0,
            participants_deleted: 1,
            failed: 0,
        }
    );

    assert!(ctx.state.registry.find_by_id(&old).await.is_err());
    assert!(ctx.store.get_chat(chat.id).await?.is_none());
    assert!(ctx.store.messages_by_author(bob.id).await?.is_empty());
    assert!(ctx.state.devices.merge_by_conference(&old).await?.is_empty());
    assert!(ctx.store.get_participant(ann.id).await?.is_none());
    assert!(ctx.store.get_participant(bob.id).await?.is_some());

    let again = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(again, ReclaimReport::default());

    Ok(())
}

#[tokio::test]
async fn test_recent_conferences_survive() -> Result<(), anyhow::Error> {
    let ctx = TestContext::new();
    let (fresh, _) = ctx.state.registry.create(None, "Ann").await?;
    let cy = ctx.temporary("Cy").await;
    ctx.aged_conference("last-week", Duration::days(7), &[&cy])
        .await;

    let report = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(report.conferences_reclaimed, 0);
    ctx.state.registry.find_by_id(&fresh.id).await?;

    Ok(())
}

#[tokio::test]
async fn test_occupied_conferences_are_skipped_by_default() -> Result<(), anyhow::Error> {
    let ctx = TestContext::new();
    let ann = ctx.temporary("Ann").await;
    let old = ctx
        .aged_conference("busy-conference", Duration::days(45), &[&ann])
        .await;
    ctx.state.presence.join(ann.id, &old).await?;

    let report = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(report.conferences_reclaimed, 0);
    assert_eq!(report.skipped_active, 1);
    ctx.state.registry.find_by_id(&old).await?;

    Ok(())
}

#[tokio::test]
async fn test_age_only_mode_reclaims_occupied_conferences() -> Result<(), anyhow::Error> {
    let ctx = TestContext::with_vars(&[("RECLAIM_REQUIRE_IDLE", "false")]);
    let ann = ctx.temporary("Ann").await;
    let old = ctx
        .aged_conference("busy-conference", Duration::days(45), &[&ann])
        .await;
    ctx.state.presence.join(ann.id, &old).await?;

    let report = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(report.conferences_reclaimed, 1);
    assert_eq!(ctx.state.presence.count_conference_joins(&old).await?, 0);
    assert!(ctx.store.get_participant(ann.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn test_retention_is_configurable() -> Result<(), anyhow::Error> {
    let ctx = TestContext::with_vars(&[("CONFERENCE_RETENTION_DAYS", "3")]);
    let ann = ctx.temporary("Ann").await;
    let old = ctx
        .aged_conference("four-days", Duration::days(4), &[&ann])
        .await;

    let report = ctx.state.registry.reclaim_unused().await?;
    assert_eq!(report.conferences_reclaimed, 1);
    assert!(ctx.state.registry.find_by_id(&old).await.is_err());

    Ok(())
}

#[tokio::test]
async fn test_participant_cycle_deletes_stale_idle_temporaries() -> Result<(), anyhow::Error> {
    let ctx = TestContext::new();

    let mut stale = Participant::temporary("Stale");
    stale.created_at = chrono::Utc::now() - Duration::days(2);
    ctx.store.insert_participant(&stale).await?;

    let mut present = Participant::temporary("Present");
    present.created_at = chrono::Utc::now() - Duration::days(2);
    ctx.store.insert_participant(&present).await?;
    let (conference, _) = ctx.state.registry.create(None, "Host").await?;
    ctx.state.presence.join(present.id, &conference.id).await?;

    let fresh = ctx.temporary("Fresh").await;
    let bob = ctx.permanent("Bob Builder", "bob@example.com").await;

    ctx.state.scheduler.reclaim_participants().await?;

    assert!(ctx.store.get_participant(stale.id).await?.is_none());
    assert!(ctx.store.get_participant(present.id).await?.is_some());
    assert!(ctx.store.get_participant(fresh.id).await?.is_some());
    assert!(ctx.store.get_participant(bob.id).await?.is_some());

    Ok(())
}

#[tokio::test]
async fn test_scheduler_conference_cycle() -> Result<(), anyhow::Error> {
    let ctx = TestContext::new();
    let ann = ctx.temporary("Ann").await;
    let old = ctx
        .aged_conference("old-conference", Duration::days(60), &[&ann])
        .await;

    ctx.state.scheduler.reclaim_conferences().await?;
    assert!(ctx.state.registry.find_by_id(&old).await.is_err());

    ctx.state.scheduler.reclaim_conferences().await?;
    Ok(())
}
