//! `campus-drain-worker`: runs the event drain loop until Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use tracing::info;

use campus_core::{TenantId, UserId};
use campus_events::{EventDispatcher, EventHandler, HandlerError};
use campus_infra::{
    DispatchMode, DrainWorkerConfig, EventCommitter, EventDrainWorker, InMemoryPendingEventStore,
};
use campus_profiles::{ProfileCreated, ProfileUpdated, UserProfile};

/// Writes profile activity to the log.
struct ProfileActivityLog;

#[async_trait]
impl EventHandler<ProfileCreated> for ProfileActivityLog {
    fn name(&self) -> &'static str {
        "profile_activity_log"
    }

    async fn handle(&self, event: &ProfileCreated) -> Result<(), HandlerError> {
        info!(user_id = %event.user_id, display_name = %event.display_name, "profile created");
        Ok(())
    }
}

#[async_trait]
impl EventHandler<ProfileUpdated> for ProfileActivityLog {
    fn name(&self) -> &'static str {
        "profile_activity_log"
    }

    async fn handle(&self, event: &ProfileUpdated) -> Result<(), HandlerError> {
        info!(
            user_id = %event.user_id,
            from = %event.previous_display_name,
            to = %event.display_name,
            "profile updated"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    campus_observability::init();

    let config = DrainWorkerConfig::from_env().context("invalid drain worker configuration")?;

    let mut dispatcher = EventDispatcher::new();
    dispatcher
        .register::<ProfileCreated, _>(ProfileActivityLog)
        .register::<ProfileUpdated, _>(ProfileActivityLog);
    let dispatcher = Arc::new(dispatcher);

    let pending = Arc::new(InMemoryPendingEventStore::new());
    let committer =
        EventCommitter::new(dispatcher.clone(), pending.clone(), DispatchMode::Deferred);

    // One demo profile so the first tick has something to drain.
    let mut profile = UserProfile::create(UserId::new(), TenantId::new(), "Demo User", Utc::now())?;
    profile.rename("Demo User (renamed)", Utc::now())?;
    committer
        .commit(&mut profile, |_| Box::pin(async { Ok::<_, anyhow::Error>(()) }))
        .await?;

    let handle = EventDrainWorker::new(config, pending, dispatcher.clone()).spawn();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    handle.shutdown().await;

    info!(stats = %serde_json::to_string(&dispatcher.stats())?, "dispatch totals");
    Ok(())
}
