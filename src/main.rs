//! collab-notify - demo harness for the collaboration services

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use collab_notify::config::CollabConfig;
use collab_notify::delegation::{CurrentUser, DelegationPriority, Role, StaticUser};
use collab_notify::models::ConnectionState;
use collab_notify::Collaboration;

#[derive(Parser)]
#[command(name = "collab-notify")]
#[command(about = "Run the collaboration notification simulation against a local store")]
#[command(version)]
struct Cli {
    /// SQLite URL; overrides COLLAB_DATABASE_URL (memory store when neither is set)
    #[arg(short, long)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Simulate live notifications and a sample delegation flow
    Simulate {
        /// User receiving the simulated notifications
        #[arg(short, long, default_value = "u1")]
        user: String,

        /// How long to run, in seconds
        #[arg(short = 't', long, default_value_t = 15)]
        duration: u64,

        /// Notification interval in milliseconds; overrides COLLAB_SIMULATION_INTERVAL_MS
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Print a user's notifications
    Inbox {
        #[arg(short, long, default_value = "u1")]
        user: String,

        /// Show archived notifications instead
        #[arg(long)]
        archived: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "collab_notify=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = CollabConfig::from_env()?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url;
    }

    let collab = Collaboration::from_config(&config).await?;

    match cli.command {
        Commands::Simulate {
            user,
            duration,
            interval,
        } => {
            if let Some(ms) = interval {
                config.simulation_interval_ms = ms;
            }
            simulate(&collab, &config, &user, Duration::from_secs(duration)).await?;
        }
        Commands::Inbox { user, archived } => {
            let notifications = if archived {
                collab.notifications.get_archived_notifications(&user).await?
            } else {
                collab.notifications.get_notifications(&user).await?
            };
            for n in &notifications {
                println!(
                    "{} [{}] {} - {} ({})",
                    n.created_at.format("%Y-%m-%d %H:%M:%S"),
                    if n.is_read { "read" } else { "new" },
                    n.title,
                    n.message,
                    n.notification_type.as_str()
                );
            }
            println!(
                "{} notifications, {} unread",
                notifications.len(),
                collab.notifications.get_unread_count(&user).await?
            );
        }
    }

    Ok(())
}

async fn simulate(
    collab: &Collaboration,
    config: &CollabConfig,
    user: &str,
    duration: Duration,
) -> Result<()> {
    let service = &collab.notifications;

    let snapshots = service.subscribe(|all| {
        tracing::debug!("Snapshot: {} notifications stored", all.len());
    });
    let connection = service.subscribe_to_connection(|state| match state {
        ConnectionState::Connected => tracing::info!("Live updates connected"),
        other => tracing::warn!("Live updates {}", other.as_str()),
    });

    let mut arrivals = service.subscribe_to_arrivals();
    let arrival_log = tokio::spawn(async move {
        while let Ok(arrival) = arrivals.recv().await {
            tracing::info!(
                "Arrived for {}: {} ({})",
                arrival.notification.recipient_id,
                arrival.notification.title,
                arrival.timestamp.format("%H:%M:%S%.3f")
            );
        }
    });

    service.start_connection_simulation(config.connection_flap_interval());
    service.start_notification_simulation(user, config.simulation_interval());

    // A teammate hands the user a task, then reassigns it back and forth
    let teammate = Arc::new(StaticUser(CurrentUser::new("teammate", "Teammate", Role::Member)));
    let actions = collab.actions(teammate);
    let first = actions
        .delegations
        .delegate_task("demo-task", user, Some("Take a look".to_string()), None)
        .await?;
    actions
        .comments
        .add_comment("demo-task", &format!("@{} this one is yours now", user), None)
        .await?;
    actions
        .delegations
        .delegate_task("demo-task", "reviewer", None, Some(DelegationPriority::Urgent))
        .await?;
    tracing::info!(
        "Delegation {} superseded; active assignee is {:?}",
        first.id,
        collab
            .delegations
            .get_active_delegation_for_task("demo-task")
            .await?
            .map(|d| d.assignee_id)
    );

    tokio::time::sleep(duration).await;

    service.stop_notification_simulation();
    service.stop_connection_simulation();
    snapshots.unsubscribe();
    connection.unsubscribe();
    arrival_log.abort();

    let unread = service.get_unread_count(user).await?;
    let marked = actions_for(collab, user).notifications.mark_all_as_read().await?;
    tracing::info!("{} had {} unread notifications; marked {} read", user, unread, marked);

    if let Some(err) = actions.handler.current_error() {
        tracing::warn!("Last failure: {} (try: {})", err, err.suggestions().join("; "));
    }
    Ok(())
}

fn actions_for(collab: &Collaboration, user: &str) -> collab_notify::Actions {
    collab.actions(Arc::new(StaticUser(CurrentUser::new(user, user, Role::Member))))
}
