use agora_config::load as load_config;
use agora_database::{ConversationRepository, CreateUserRequest, UserRepository};
use agora_relay::create_router;
use agora_runtime::{shutdown_signal, telemetry, BackendServices};
use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::Row;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;

#[derive(Parser)]
#[command(name = "agora-backend")]
#[command(about = "Agora real-time message relay (serves by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP and WebSocket server
    Serve,
    /// Dump users, conversations, messages and notifications
    DumpData,
    /// Seed the database with demo users and conversations
    SeedData,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    telemetry::init_tracing().context("failed to initialise tracing")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server().await,
        Commands::DumpData => dump_data().await,
        Commands::SeedData => seed_data().await,
    }
}

async fn initialise() -> anyhow::Result<(agora_config::AppConfig, BackendServices)> {
    let config = load_config().context("failed to load configuration")?;
    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;
    Ok((config, services))
}

async fn run_server() -> anyhow::Result<()> {
    info!("starting Agora relay");

    let (config, services) = initialise().await?;
    let app = create_router(services.relay.clone()).layer(CorsLayer::permissive());

    let address = format!("{}:{}", config.http.address, config.http.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server error")?;

    info!("relay shut down");
    Ok(())
}

async fn seed_data() -> anyhow::Result<()> {
    info!("seeding database with demo data");

    let (_config, services) = initialise().await?;
    let users = UserRepository::new(services.db_pool.clone());
    let conversations = ConversationRepository::new(services.db_pool.clone());

    let mut ids = Vec::new();
    for (first_name, last_name) in [("Ada", "Lovelace"), ("Grace", "Hopper"), ("Alan", "Turing")] {
        let user = users
            .create(&CreateUserRequest {
                first_name: first_name.to_string(),
                last_name: last_name.to_string(),
                avatar: None,
            })
            .await
            .with_context(|| format!("failed to create user {first_name}"))?;
        ids.push(user.id);
    }

    let direct = conversations
        .find_or_create_direct(ids[0], ids[1])
        .await
        .context("failed to create direct conversation")?;

    let group_id = sqlx::query_scalar::<_, i64>(
        "SELECT COALESCE(MAX(group_id), 0) + 1 FROM conversations",
    )
    .fetch_one(&services.db_pool)
    .await
    .context("failed to allocate group id")?;
    let group = conversations
        .create_group(group_id, "Analytical Engine", &ids)
        .await
        .context("failed to create group conversation")?;

    println!("Database seeded with demo data:");
    println!("- users {ids:?}");
    println!("- direct conversation {} between {} and {}", direct.id, ids[0], ids[1]);
    println!("- group conversation {} (group {group_id})", group.id);
    println!("Run 'dump-data' to see the inserted data");

    Ok(())
}

async fn dump_data() -> anyhow::Result<()> {
    info!("dumping relay data from database");

    let (_config, services) = initialise().await?;
    let pool = &services.db_pool;

    println!("=== USERS ===");
    let users = sqlx::query("SELECT id, first_name, last_name, avatar FROM users ORDER BY id")
        .fetch_all(pool)
        .await
        .context("failed to fetch users")?;
    println!("{:<5} {:<20} {:<20} {:<30}", "ID", "First Name", "Last Name", "Avatar");
    println!("{}", "-".repeat(78));
    for user in users {
        let id: i64 = user.try_get("id")?;
        let first_name: String = user.try_get("first_name")?;
        let last_name: String = user.try_get("last_name")?;
        let avatar: Option<String> = user.try_get("avatar")?;
        println!(
            "{:<5} {:<20} {:<20} {:<30}",
            id,
            first_name,
            last_name,
            avatar.as_deref().unwrap_or("NULL")
        );
    }

    println!("\n=== CONVERSATIONS ===");
    let conversations = sqlx::query(
        r#"
        SELECT c.id, c.is_group, c.group_id, c.name, GROUP_CONCAT(p.user_id) AS members
        FROM conversations c
        LEFT JOIN participants p ON p.conversation_id = c.id
        GROUP BY c.id
        ORDER BY c.id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch conversations")?;
    println!("{:<5} {:<8} {:<8} {:<25} {:<20}", "ID", "Kind", "Group", "Name", "Members");
    println!("{}", "-".repeat(70));
    for conversation in conversations {
        let id: i64 = conversation.try_get("id")?;
        let is_group: bool = conversation.try_get("is_group")?;
        let group_id: Option<i64> = conversation.try_get("group_id")?;
        let name: String = conversation.try_get("name")?;
        let members: Option<String> = conversation.try_get("members")?;
        println!(
            "{:<5} {:<8} {:<8} {:<25} {:<20}",
            id,
            if is_group { "group" } else { "direct" },
            group_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            name,
            members.unwrap_or_default()
        );
    }

    println!("\n=== MESSAGES ===");
    let messages = sqlx::query(
        r#"
        SELECT id, conversation_id, group_id, sender_id, content, is_deleted, created_at
        FROM messages
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch messages")?;
    println!(
        "{:<6} {:<8} {:<8} {:<8} {:<50} {:<8} {:<25}",
        "ID", "Conv", "Group", "Sender", "Content (truncated)", "Deleted", "Created At"
    );
    println!("{}", "-".repeat(120));
    for message in messages {
        let id: i64 = message.try_get("id")?;
        let conversation_id: Option<i64> = message.try_get("conversation_id")?;
        let group_id: Option<i64> = message.try_get("group_id")?;
        let sender_id: i64 = message.try_get("sender_id")?;
        let content: String = message.try_get("content")?;
        let is_deleted: bool = message.try_get("is_deleted")?;
        let created_at: String = message.try_get("created_at")?;

        let content_display = if content.chars().count() > 47 {
            format!("{}...", content.chars().take(44).collect::<String>())
        } else {
            content
        };

        println!(
            "{:<6} {:<8} {:<8} {:<8} {:<50} {:<8} {:<25}",
            id,
            conversation_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            group_id.map(|id| id.to_string()).unwrap_or_else(|| "-".to_string()),
            sender_id,
            content_display,
            is_deleted,
            created_at
        );
    }

    println!("\n=== NOTIFICATIONS ===");
    let notifications = sqlx::query(
        r#"
        SELECT id, receiver_id, sender_id, conversation_id, content, is_read
        FROM notifications
        ORDER BY id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to fetch notifications")?;
    if notifications.is_empty() {
        println!("No notifications found in database");
    }
    for notification in notifications {
        let id: i64 = notification.try_get("id")?;
        let receiver_id: i64 = notification.try_get("receiver_id")?;
        let sender_id: i64 = notification.try_get("sender_id")?;
        let conversation_id: i64 = notification.try_get("conversation_id")?;
        let content: String = notification.try_get("content")?;
        let is_read: bool = notification.try_get("is_read")?;
        println!(
            "{id:<6} to {receiver_id:<6} from {sender_id:<6} in {conversation_id:<6} read={is_read:<5} {content}"
        );
    }

    Ok(())
}
