//! Operator command line: schema migrations, staff tokens and catalog seeding.

use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use migrations::Migrator;
use parfum_api::{
    auth::{self, AuthConfig, AuthService, TokenRequest},
    config::{self, AppConfig},
    db::{self, DbPool},
    errors::ServiceError,
    services::catalog::{CatalogService, NewProduct},
};
use rust_decimal_macros::dec;
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "parfum-admin", version, about = "Parfum API operator tools")]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON when available"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database schema management
    #[command(subcommand)]
    Migrate(MigrateCommands),
    /// Mint a bearer token for back-office staff
    IssueToken(IssueTokenArgs),
    /// Load products into the catalog
    SeedProducts(SeedArgs),
}

#[derive(Subcommand)]
enum MigrateCommands {
    /// Apply all pending migrations
    Up,
    /// Roll back the most recent migrations
    Down {
        #[arg(long, default_value_t = 1)]
        steps: u32,
    },
    /// List applied and pending migrations
    Status,
}

#[derive(Args)]
struct IssueTokenArgs {
    /// Staff member identifier recorded as the actor in audit trails
    #[arg(long)]
    subject: String,
    #[arg(long)]
    name: Option<String>,
    #[arg(long)]
    email: Option<String>,
    /// Grant the admin role (every permission)
    #[arg(long, action = ArgAction::SetTrue)]
    admin: bool,
    /// Explicit permission, repeatable (e.g. orders:read)
    #[arg(long = "permission")]
    permissions: Vec<String>,
    /// Lifetime in seconds; defaults to the configured expiration
    #[arg(long)]
    ttl_secs: Option<u64>,
}

#[derive(Args)]
struct SeedArgs {
    /// JSON array of products; the built-in starter catalog is used when omitted
    #[arg(long)]
    file: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SeedSummary {
    created: usize,
    skipped: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(&config.log_level, config.log_json);

    match cli.command {
        Commands::Migrate(command) => migrate(&config, command).await,
        Commands::IssueToken(args) => issue_token(&config, args, cli.json),
        Commands::SeedProducts(args) => seed_products(&config, args, cli.json).await,
    }
}

async fn connect(config: &AppConfig) -> Result<DbPool> {
    db::establish_connection_from_app_config(config)
        .await
        .context("failed to connect to database")
}

async fn migrate(config: &AppConfig, command: MigrateCommands) -> Result<()> {
    let pool = connect(config).await?;
    match command {
        MigrateCommands::Up => {
            db::run_migrations(&pool).await?;
            println!("Migrations applied");
        }
        MigrateCommands::Down { steps } => {
            Migrator::down(&pool, Some(steps))
                .await
                .context("rollback failed")?;
            println!("Rolled back {} migration(s)", steps);
        }
        MigrateCommands::Status => {
            Migrator::status(&pool).await.context("status failed")?;
        }
    }
    Ok(())
}

fn issue_token(config: &AppConfig, args: IssueTokenArgs, json: bool) -> Result<()> {
    if !args.admin && args.permissions.is_empty() {
        bail!("grant --admin or at least one --permission");
    }
    for permission in &args.permissions {
        if !auth::is_known_permission(permission) {
            return Err(anyhow!(
                "unknown permission '{}'; expected one of {}",
                permission,
                auth::all_permissions().join(", ")
            ));
        }
    }

    let service = AuthService::new(AuthConfig::from(config));
    let roles = if args.admin {
        vec![auth::ADMIN_ROLE.to_string()]
    } else {
        Vec::new()
    };
    let issued = service
        .issue_token(TokenRequest {
            subject: args.subject.clone(),
            name: args.name,
            email: args.email,
            roles,
            permissions: args.permissions,
            ttl: args.ttl_secs.map(Duration::from_secs),
        })
        .map_err(|e| anyhow!("failed to issue token: {}", e))?;
    info!(subject = %args.subject, token_id = %issued.token_id, "staff token issued");

    if json {
        println!("{}", serde_json::to_string_pretty(&issued)?);
    } else {
        println!("{}", issued.access_token);
    }
    Ok(())
}

async fn seed_products(config: &AppConfig, args: SeedArgs, json: bool) -> Result<()> {
    let products = match &args.file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            serde_json::from_str::<Vec<NewProduct>>(&raw)
                .with_context(|| format!("{} is not a JSON array of products", path.display()))?
        }
        None => starter_catalog(),
    };

    let catalog = CatalogService::new(Arc::new(connect(config).await?));
    let mut summary = SeedSummary {
        created: 0,
        skipped: 0,
    };
    for product in products {
        let sku = product.sku.clone();
        match catalog.create_product(product).await {
            Ok(created) => {
                summary.created += 1;
                info!(sku = %sku, product_id = %created.id, "seeded product");
            }
            // Re-running the seed leaves existing SKUs alone
            Err(ServiceError::ValidationError(msg)) if msg.contains("SKU") => {
                summary.skipped += 1;
            }
            Err(e) => {
                warn!(sku = %sku, error = %e, "could not seed product");
                return Err(e.into());
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Seeded {} product(s), {} already present",
            summary.created, summary.skipped
        );
    }
    Ok(())
}

fn starter_catalog() -> Vec<NewProduct> {
    use parfum_api::entities::product::ProductCategory;

    let item = |sku: &str,
                en: &str,
                fr: &str,
                category: ProductCategory,
                price: rust_decimal::Decimal,
                stock: i32| NewProduct {
        sku: sku.to_string(),
        name_en: en.to_string(),
        name_fr: fr.to_string(),
        description_en: None,
        description_fr: None,
        category,
        price,
        stock,
    };
    vec![
        item("ROSE-50", "Atlas Rose", "Rose de l'Atlas", ProductCategory::Women, dec!(850.00), 25),
        item("OUD-100", "Royal Oud", "Oud Royal", ProductCategory::Men, dec!(1200.00), 15),
        item("NEROLI-50", "Medina Neroli", "Néroli de la Médina", ProductCategory::Unisex, dec!(690.00), 30),
        item("AMBER-75", "Desert Amber", "Ambre du Désert", ProductCategory::Unisex, dec!(950.00), 20),
    ]
}
