use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde::de::DeserializeOwned;
use session::api::{ApiClient, ApiError};
use session::config::{ClientConfig, ConfigError};
use session::forms::{self, FormError, LoginForm, ProfileForm, RegisterForm, RegisterOutcome};
use session::gateway::{GatewayError, HttpIdentityGateway};
use session::manager::{Navigator, SessionManager};
use session::routes::{RouteDecision, RoutePolicy};
use session::token_store::TokenStore;
use session::types::{OrderStatus, ProductCondition, ProductInput, ProductStatus};

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error(transparent)]
    Form(#[from] FormError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("not signed in; run `campusmart-cli login` first")]
    NotSignedIn,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned HTTP {0}")]
    ServerStatus(u16),
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

#[derive(Parser, Debug)]
#[command(name = "campusmart-cli", about = "campusmart session and marketplace CLI")]
struct Cli {
    /// Where the session token is persisted (shared with other CLI invocations).
    #[arg(long, env = "CAMPUSMART_TOKEN_FILE")]
    token_file: Option<PathBuf>,

    /// Path the CLI pretends to be on; drives the login/register redirect rules.
    #[arg(long, default_value = "/")]
    at: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the guard server's health endpoint.
    Ping {
        #[arg(long, env = "CAMPUSMART_SITE_URL", default_value = "http://127.0.0.1:3000")]
        server_url: String,
    },
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAMPUSMART_PASSWORD", hide_env_values = true)]
        password: String,
    },
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "CAMPUSMART_PASSWORD", hide_env_values = true)]
        password: String,
        /// Defaults to `--password`.
        #[arg(long)]
        confirm_password: Option<String>,
    },
    Logout,
    Whoami,
    Refresh,
    /// Print every session change, including ones made by other processes.
    Watch {
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
    },
    Profile(ProfileArgs),
    Products(ProductsCommand),
    Orders(OrdersCommand),
    Wishlist(WishlistCommand),
    Report {
        product_id: String,
        #[arg(long)]
        reason: String,
    },
    Admin(AdminCommand),
    /// Show how the route guard treats a path.
    Route {
        path: String,
        #[arg(long, default_value_t = false)]
        signed_in: bool,
        #[arg(long, env = "LANDING_PATH")]
        landing_path: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ProfileArgs {
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    bio: Option<String>,
    #[arg(long)]
    university_id: Option<String>,
    #[arg(long)]
    avatar_url: Option<String>,
}

#[derive(Args, Debug)]
struct ProductsCommand {
    #[command(subcommand)]
    command: ProductsSubcommand,
}

#[derive(Subcommand, Debug)]
enum ProductsSubcommand {
    List {
        /// Raw query string, e.g. `category=books&search=lamp`.
        #[arg(long)]
        query: Option<String>,
    },
    Mine,
    Show {
        id: String,
    },
    Create(ProductArgs),
    Update {
        id: String,
        #[command(flatten)]
        product: ProductArgs,
    },
    Delete {
        id: String,
    },
}

#[derive(Args, Debug)]
struct ProductArgs {
    #[arg(long)]
    title: String,
    #[arg(long)]
    price_cents: i64,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long, value_parser = parse_wire::<ProductCondition>)]
    condition: Option<ProductCondition>,
    #[arg(long)]
    location: Option<String>,
}

impl From<ProductArgs> for ProductInput {
    fn from(args: ProductArgs) -> Self {
        Self {
            title: args.title,
            description: args.description,
            price_cents: args.price_cents,
            category: args.category,
            condition: args.condition,
            location: args.location,
        }
    }
}

#[derive(Args, Debug)]
struct OrdersCommand {
    #[command(subcommand)]
    command: OrdersSubcommand,
}

#[derive(Subcommand, Debug)]
enum OrdersSubcommand {
    List,
    Show { id: String },
}

#[derive(Args, Debug)]
struct WishlistCommand {
    #[command(subcommand)]
    command: WishlistSubcommand,
}

#[derive(Subcommand, Debug)]
enum WishlistSubcommand {
    List,
    Add { product_id: String },
    Remove { product_id: String },
}

#[derive(Args, Debug)]
struct AdminCommand {
    #[command(subcommand)]
    command: AdminSubcommand,
}

#[derive(Subcommand, Debug)]
enum AdminSubcommand {
    Stats,
    Users,
    ToggleBlock {
        user_id: String,
    },
    Products {
        #[arg(long, value_parser = parse_wire::<ProductStatus>)]
        status: Option<ProductStatus>,
    },
    Orders,
    OrderStatus {
        order_id: String,
        #[arg(value_parser = parse_wire::<OrderStatus>)]
        status: OrderStatus,
    },
    Reports,
    Resolve {
        report_id: String,
        #[arg(long)]
        action: String,
        #[arg(long)]
        note: Option<String>,
    },
}

/// Parse a lowercase wire name (`available`, `like-new`, ...) into its enum.
fn parse_wire<T: DeserializeOwned>(raw: &str) -> Result<T, String> {
    serde_json::from_value(serde_json::Value::String(raw.trim().to_ascii_lowercase()))
        .map_err(|_| format!("unknown value {raw:?}"))
}

// =============================================================================
// NAVIGATION
// =============================================================================

/// Tracks the pretend location and reports redirects on stderr.
struct TerminalNavigator {
    location: Mutex<String>,
}

impl TerminalNavigator {
    fn new(at: &str) -> Self {
        Self { location: Mutex::new(at.to_owned()) }
    }
}

impl Navigator for TerminalNavigator {
    fn location(&self) -> String {
        self.location.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn redirect(&self, to: &str) {
        eprintln!("-> {to}");
        *self.location.lock().unwrap_or_else(PoisonError::into_inner) = to.to_owned();
    }
}

// =============================================================================
// CONTEXT
// =============================================================================

struct CliContext {
    config: ClientConfig,
    store: TokenStore,
    manager: Arc<SessionManager>,
    api: ApiClient,
}

impl CliContext {
    fn new(token_file: Option<PathBuf>, at: &str) -> Result<Self, CliError> {
        let mut config = ClientConfig::from_env()?;
        if let Some(path) = token_file {
            config.token_file = path;
        }
        let store = TokenStore::file(&config.token_file);
        let gateway = Arc::new(HttpIdentityGateway::new(&config.gateway)?);
        let navigator = Arc::new(TerminalNavigator::new(at));
        let manager = SessionManager::new(gateway, store.clone(), navigator, RoutePolicy::default());
        let api = ApiClient::new(&config.gateway.api_url, config.gateway.timeouts, store.clone(), manager.clone())?;
        tracing::debug!(token_file = %config.token_file.display(), "cli context ready");
        Ok(Self { config, store, manager, api })
    }

    /// Boot the session and require a signed-in user.
    async fn signed_in(&self) -> Result<(), CliError> {
        self.manager.boot().await;
        if self.manager.user().is_none() {
            return Err(CliError::NotSignedIn);
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    // Commands that need no session.
    let command = match cli.command {
        Command::Ping { server_url } => return run_ping(&server_url).await,
        Command::Route { path, signed_in, landing_path } => {
            run_route(&path, signed_in, landing_path);
            return Ok(());
        }
        other => other,
    };

    let ctx = CliContext::new(cli.token_file, &cli.at)?;
    let result = run_session(&ctx, command).await;
    ctx.manager.shutdown();
    result
}

async fn run_session(ctx: &CliContext, command: Command) -> Result<(), CliError> {
    match command {
        Command::Login { email, password } => {
            let user = forms::submit_login(&ctx.manager, &LoginForm { email, password }).await?;
            eprintln!("signed in as {} <{}>", user.name, user.email);
            print_json(&user)
        }
        Command::Register { name, email, password, confirm_password } => {
            let form = RegisterForm {
                full_name: name,
                email,
                confirm_password: confirm_password.unwrap_or_else(|| password.clone()),
                password,
            };
            let strength = forms::password_strength(&form.password);
            eprintln!("password strength: {} ({}/5)", strength.label, strength.level);
            match forms::submit_register(&ctx.manager, &form, &ctx.config.university_domain).await? {
                RegisterOutcome::CheckEmail { email } => {
                    println!("check {email} for a verification link");
                    Ok(())
                }
                RegisterOutcome::SignedIn(user) => print_json(&user),
            }
        }
        Command::Logout => {
            ctx.manager.logout();
            println!("signed out");
            Ok(())
        }
        Command::Whoami => {
            ctx.signed_in().await?;
            print_json(&ctx.manager.user())
        }
        Command::Refresh => {
            ctx.signed_in().await?;
            ctx.manager.refresh_user().await;
            print_json(&ctx.manager.snapshot().user.ok_or(CliError::NotSignedIn)?)
        }
        Command::Watch { interval_ms } => run_watch(ctx, Duration::from_millis(interval_ms)).await,
        Command::Profile(args) => run_profile(ctx, args).await,
        Command::Products(products) => run_products(ctx, products).await,
        Command::Orders(orders) => match orders.command {
            OrdersSubcommand::List => print_json(&ctx.api.orders().await?),
            OrdersSubcommand::Show { id } => print_json(&ctx.api.order(&id).await?),
        },
        Command::Wishlist(wishlist) => match wishlist.command {
            WishlistSubcommand::List => print_json(&ctx.api.wishlist().await?),
            WishlistSubcommand::Add { product_id } => {
                ctx.api.add_to_wishlist(&product_id).await?;
                println!("added {product_id}");
                Ok(())
            }
            WishlistSubcommand::Remove { product_id } => {
                ctx.api.remove_from_wishlist(&product_id).await?;
                println!("removed {product_id}");
                Ok(())
            }
        },
        Command::Report { product_id, reason } => print_json(&ctx.api.report_product(&product_id, &reason).await?),
        Command::Admin(admin) => run_admin(ctx, admin).await,
        Command::Ping { .. } | Command::Route { .. } => Ok(()),
    }
}

async fn run_ping(server_url: &str) -> Result<(), CliError> {
    let client = reqwest::Client::new();
    let url = format!("{}/healthz", server_url.trim_end_matches('/'));
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(CliError::ServerStatus(status.as_u16()));
    }
    println!("ok");
    Ok(())
}

fn run_route(path: &str, signed_in: bool, landing_path: Option<String>) {
    let policy = landing_path.map_or_else(RoutePolicy::default, RoutePolicy::new);
    let class = policy.classify(path);
    match policy.decide(path, signed_in) {
        RouteDecision::Allow => println!("{class:?}: allow"),
        RouteDecision::Redirect(to) => println!("{class:?}: redirect to {to}"),
    }
}

async fn run_watch(ctx: &CliContext, interval: Duration) -> Result<(), CliError> {
    let mut snapshots = ctx.manager.subscribe();
    ctx.manager.boot().await;
    let watcher = ctx.store.spawn_watcher(interval);
    print_json(&*snapshots.borrow_and_update())?;

    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                print_json(&snapshot)?;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    watcher.abort();
    Ok(())
}

async fn run_profile(ctx: &CliContext, args: ProfileArgs) -> Result<(), CliError> {
    ctx.signed_in().await?;
    let current = ctx.manager.user().ok_or(CliError::NotSignedIn)?;
    let mut form = ProfileForm::from_user(&current);
    if let Some(name) = args.name {
        form.name = name;
    }
    if let Some(bio) = args.bio {
        form.bio = bio;
    }
    if let Some(university_id) = args.university_id {
        form.university_id = university_id;
    }
    if let Some(avatar_url) = args.avatar_url {
        form.avatar_url = avatar_url;
    }
    let updated = forms::submit_profile(&ctx.manager, &ctx.api, &form).await?;
    print_json(&updated)
}

async fn run_products(ctx: &CliContext, products: ProductsCommand) -> Result<(), CliError> {
    match products.command {
        ProductsSubcommand::List { query } => print_json(&ctx.api.list_products(query.as_deref()).await?),
        ProductsSubcommand::Mine => print_json(&ctx.api.my_products().await?),
        ProductsSubcommand::Show { id } => print_json(&ctx.api.product(&id).await?),
        ProductsSubcommand::Create(args) => print_json(&ctx.api.create_product(&args.into()).await?),
        ProductsSubcommand::Update { id, product } => print_json(&ctx.api.update_product(&id, &product.into()).await?),
        ProductsSubcommand::Delete { id } => {
            ctx.api.delete_product(&id).await?;
            println!("deleted {id}");
            Ok(())
        }
    }
}

async fn run_admin(ctx: &CliContext, admin: AdminCommand) -> Result<(), CliError> {
    match admin.command {
        AdminSubcommand::Stats => print_json(&ctx.api.admin_stats().await?),
        AdminSubcommand::Users => print_json(&ctx.api.admin_users().await?),
        AdminSubcommand::ToggleBlock { user_id } => print_json(&ctx.api.toggle_user_block(&user_id).await?),
        AdminSubcommand::Products { status } => print_json(&ctx.api.admin_products(status).await?),
        AdminSubcommand::Orders => print_json(&ctx.api.admin_orders().await?),
        AdminSubcommand::OrderStatus { order_id, status } => {
            print_json(&ctx.api.update_order_status(&order_id, status).await?)
        }
        AdminSubcommand::Reports => print_json(&ctx.api.admin_reports().await?),
        AdminSubcommand::Resolve { report_id, action, note } => {
            print_json(&ctx.api.resolve_report(&report_id, &action, note.as_deref()).await?)
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string_pretty(value)?;
    println!("{rendered}");
    Ok(())
}
