//! Monetoile 命令行客户端

use anyhow::Context;
use clap::{Parser, Subcommand};
use monetoile_client::{
    auth::{jwt, TokenStorage},
    config::ClientConfig,
    models::auth::{LoginRequest, RegisterRequest},
    services::AuthService,
    telemetry, ApiClient, AuthEvent,
};
use secrecy::Secret;

#[derive(Parser)]
#[command(name = "monetoile-client", version, about = "Monetoile API client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 登录并保存会话
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MONETOILE_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// 注册新账户
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "MONETOILE_PASSWORD", hide_env_values = true)]
        password: String,
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
        #[arg(long)]
        phone: Option<String>,
    },
    /// 显示当前用户
    Me,
    /// 登出并清除本地会话
    Logout,
    /// 显示令牌状态
    Status,
    /// 以当前会话发送 GET 请求并打印 JSON
    Get { path: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 按优先级加载：.env.local > .env
    dotenv::from_filename(".env.local").ok();
    dotenv::dotenv().ok();

    let config = ClientConfig::from_env().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        anyhow::anyhow!("Failed to load configuration: {}", e)
    })?;

    telemetry::init_telemetry(&config.logging);

    let storage = TokenStorage::from_path(config.storage.path.as_deref())
        .context("Failed to open token store")?;
    let client = ApiClient::new(config, storage)?;
    let auth = AuthService::new(client.clone());

    let mut events = client.events().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let AuthEvent::SessionExpired { redirect_to } = event {
                eprintln!("Session expired, please log in again ({})", redirect_to);
            }
        }
    });

    match cli.command {
        Command::Login { email, password } => {
            let resp = auth.login(LoginRequest::new(email, password)).await?;
            match resp.user {
                Some(user) => println!("Logged in as {}", user.display_name()),
                None => println!("Logged in"),
            }
        }
        Command::Register {
            email,
            password,
            first_name,
            last_name,
            phone,
        } => {
            let req = RegisterRequest {
                email,
                password: Secret::new(password),
                first_name,
                last_name,
                phone,
            };
            let resp = auth.register(req).await?;
            match resp.user {
                Some(user) => println!("Registered {}", user.display_name()),
                None => println!("Registered"),
            }
        }
        Command::Me => {
            let user = auth.me().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }
        Command::Logout => {
            auth.logout().await;
            println!("Logged out");
        }
        Command::Status => print_status(client.storage()),
        Command::Get { path } => {
            let value: serde_json::Value = client.get(&path).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

fn print_status(storage: &TokenStorage) {
    match storage.get_access_token() {
        Some(token) => {
            let remaining = jwt::token_time_remaining(&token);
            let state = if jwt::is_token_expired(&token) {
                "expired"
            } else {
                "valid"
            };
            println!("Access token: {} ({}s remaining)", state, remaining);
        }
        None => println!("Access token: none"),
    }

    match storage.get_refresh_token() {
        Some(token) => println!(
            "Refresh token: {} ({}s remaining)",
            if jwt::is_token_expired(&token) { "expired" } else { "valid" },
            jwt::token_time_remaining(&token)
        ),
        None => println!("Refresh token: none"),
    }

    if let Some(user) = storage.get_user() {
        println!("User: {}", user.display_name());
    }
}
