use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::Parser;
use extsvc::{
    config::ConfigLoader,
    crypto::{EncryptedConfigCodec, is_encrypted_payload},
    db,
    models::external_service::{Column, Entity},
    telemetry,
};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

/// Seal external service configs that are still stored in plaintext.
#[derive(Debug, Parser)]
#[command(name = "reencrypt_external_service_configs")]
struct Args {
    /// Report what would be sealed without writing anything.
    #[arg(long)]
    dry_run: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = ConfigLoader::new()
        .load()
        .context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing telemetry")?;

    let codec = EncryptedConfigCodec::from_key_bytes(config.crypto_key.as_deref())
        .context("initializing config encryption key")?;
    if !codec.is_encrypting() {
        bail!("crypto key not present in configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;

    let plaintext_rows = Entity::find()
        .filter(Column::EncryptionKeyId.eq(""))
        .order_by_asc(Column::Id)
        .all(&db)
        .await
        .context("querying plaintext external service configs")?;

    let mut sealed_count = 0usize;
    for service in plaintext_rows {
        if is_encrypted_payload(&service.config) {
            tracing::warn!(
                external_service_id = service.id,
                "Config is labelled plaintext but looks sealed, skipping"
            );
            continue;
        }
        let config_text = codec
            .decrypt(&service.config, &service.encryption_key_id)
            .with_context(|| format!("reading config of external service {}", service.id))?;
        let (sealed, key_id) = codec
            .encrypt(&config_text)
            .with_context(|| format!("sealing config of external service {}", service.id))?;

        if args.dry_run {
            tracing::info!(external_service_id = service.id, "Would seal config");
            sealed_count += 1;
            continue;
        }

        // Skip rows another writer sealed since the scan.
        let result = Entity::update_many()
            .col_expr(Column::Config, Expr::value(sealed))
            .col_expr(Column::EncryptionKeyId, Expr::value(key_id))
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(service.id))
            .filter(Column::EncryptionKeyId.eq(""))
            .exec(&db)
            .await
            .with_context(|| format!("updating external service {}", service.id))?;
        sealed_count += result.rows_affected as usize;
    }

    if args.dry_run {
        println!("{} external service configs would be sealed", sealed_count);
    } else {
        println!("Sealed {} external service configs", sealed_count);
    }
    Ok(())
}
