// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the wif-exchange project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Command line front end of the workload identity federation client
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use log::{debug, info};

use wif_exchange::assertion::{AssertionBuilder, IdentityAssertion};
use wif_exchange::config::{self, Config};
use wif_exchange::exchange::{AccessToken, ExchangeClient};
use wif_exchange::keys::{load_public_key_pem, KeySet, SigningKeyPair};
use wif_exchange::resource::{ResourceClient, ResourceList, ResourceRef, DEFAULT_RESOURCE_ENDPOINT};
use wif_exchange::utility::{read_artifact, write_artifact, write_secret_artifact};
use wif_exchange::{CredentialCache, FederationError, FederationPipeline};

/// Workload identity federation client (RFC 8693 token exchange)
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML format)
    #[arg(long, global = true, default_value = "config.yaml")]
    config: PathBuf,

    /// Override the subject claim
    #[arg(long, global = true)]
    subject: Option<String>,

    /// Override the audience claim
    #[arg(long, global = true)]
    audience: Option<String>,

    /// Override the service account to impersonate
    #[arg(long, global = true)]
    service_account: Option<String>,

    /// Override the project owning the listed resources
    #[arg(long, global = true)]
    project_id: Option<String>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet", global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate the RSA signing key pair (PEM)
    GenerateKeys {
        /// Output path for the private key
        #[arg(long)]
        out_private_key: Option<PathBuf>,
        /// Output path for the public key
        #[arg(long)]
        out_public_key: Option<PathBuf>,
        /// RSA key length in bits
        #[arg(long)]
        bits: Option<usize>,
    },
    /// Export the public key as a JWK and a JWK Set
    GenerateJwk {
        /// PEM public key to export
        #[arg(long)]
        public_key: Option<PathBuf>,
        /// Key id, the key thumbprint when omitted
        #[arg(long)]
        kid: Option<String>,
        #[arg(long, default_value = "public_key.jwk")]
        out_jwk: PathBuf,
        #[arg(long, default_value = "public_key.jwks")]
        out_jwks: PathBuf,
    },
    /// Sign an identity assertion
    CreateJwt {
        /// PEM private key
        #[arg(long)]
        private_key: Option<PathBuf>,
        #[arg(long, default_value = "external_token.jwt")]
        out: PathBuf,
        /// Assertion lifetime in seconds
        #[arg(long)]
        validity: Option<i64>,
    },
    /// Decode an assertion, optionally verifying it against a JWK Set
    InspectJwt {
        #[arg(long, default_value = "external_token.jwt")]
        token: PathBuf,
        /// JWK Set to verify the signature with
        #[arg(long)]
        jwks: Option<PathBuf>,
    },
    /// Exchange an assertion for a service account access token
    ExchangeToken {
        #[arg(long, default_value = "external_token.jwt")]
        token: PathBuf,
        #[arg(long, default_value = "access_token.txt")]
        out: PathBuf,
        /// Abandon the exchange after this many seconds
        #[arg(long)]
        deadline: Option<u64>,
    },
    /// List the configured resource collection with a stored access token
    ListResources {
        #[arg(long, default_value = "access_token.txt")]
        token: PathBuf,
    },
    /// Run the whole chain through the credential cache and list resources
    Run {
        /// Also store the access token
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Output the configuration schema as JSON
    ShowConfigSchema,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        log::LevelFilter::Off
    } else if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", failure_message(&err));
            ExitCode::from(exit_code(&err))
        }
    }
}

/// The single line reported on stderr when a command fails
fn failure_message(err: &anyhow::Error) -> String {
    format!("Error: {:#}", err)
}

/// Exit code of the first [`FederationError`] in the chain, 1 otherwise
fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<FederationError>())
        .map(|e| e.exit_code())
        .and_then(|code| u8::try_from(code).ok())
        .unwrap_or(1)
}

async fn run(cli: Cli) -> Result<()> {
    if let Command::ShowConfigSchema = cli.command {
        return config::output_config_schema();
    }

    let mut config = Config::from_file(&cli.config)?;
    config.apply_args(
        cli.subject.clone(),
        cli.audience.clone(),
        cli.service_account.clone(),
        cli.project_id.clone(),
        None,
        None,
    );
    config::validate_specific_rules(&config).context("Invalid command line override")?;

    match cli.command {
        Command::GenerateKeys {
            out_private_key,
            out_public_key,
            bits,
        } => generate_keys(
            &out_private_key.unwrap_or(config.keys.private_key_path.clone()),
            &out_public_key.unwrap_or(config.keys.public_key_path.clone()),
            bits.unwrap_or(config.keys.key_bits),
        ),
        Command::GenerateJwk {
            public_key,
            kid,
            out_jwk,
            out_jwks,
        } => generate_jwk(
            &public_key.unwrap_or(config.keys.public_key_path.clone()),
            kid.or(config.identity.key_id.clone()),
            &out_jwk,
            &out_jwks,
        ),
        Command::CreateJwt {
            private_key,
            out,
            validity,
        } => {
            if let Some(seconds) = validity {
                config.identity.validity_seconds = seconds;
                config.identity.validity().context("Invalid --validity")?;
            }
            let key = load_private_key(&private_key.unwrap_or(config.keys.private_key_path.clone()))?;
            create_jwt(&config, key, &out)
        }
        Command::InspectJwt { token, jwks } => inspect_jwt(&token, jwks.as_deref()),
        Command::ExchangeToken {
            token,
            out,
            deadline,
        } => exchange_token(&config, &token, &out, deadline).await,
        Command::ListResources { token } => {
            let secret = read_artifact(&token)?;
            let expires_at = Utc::now() + config.federation.expiry_policy().default_ttl;
            let list = list_resources(&config, &AccessToken::from_bearer(secret, expires_at)).await?;
            print_resources(&config, &list);
            Ok(())
        }
        Command::Run { out } => run_chain(&config, out.as_deref()).await,
        Command::ShowConfigSchema => config::output_config_schema(),
    }
}

fn load_private_key(path: &Path) -> Result<Arc<SigningKeyPair>> {
    let pem = read_artifact(path)?;
    let key = SigningKeyPair::from_private_pem(&pem)
        .with_context(|| format!("Failed to load private key from {:?}", path))?;
    Ok(Arc::new(key))
}

fn generate_keys(private_path: &Path, public_path: &Path, bits: usize) -> Result<()> {
    info!("Generating RSA key pair with {} bits...", bits);
    let key = SigningKeyPair::generate_with_bits(bits)?;

    write_secret_artifact(private_path, &key.private_key_pem()?)?;
    write_artifact(public_path, &key.public_key_pem()?)?;

    println!("Private key written to: {}", private_path.display());
    println!("Public key written to: {}", public_path.display());
    println!("Key thumbprint: {}", key.thumbprint()?);
    Ok(())
}

fn generate_jwk(
    public_path: &Path,
    kid: Option<String>,
    out_jwk: &Path,
    out_jwks: &Path,
) -> Result<()> {
    let public_key = load_public_key_pem(&read_artifact(public_path)?)
        .with_context(|| format!("Failed to load public key from {:?}", public_path))?;
    let key_set = KeySet::from_public_key(&public_key, kid.as_deref())?;

    let jwk = key_set
        .keys
        .first()
        .context("Key set unexpectedly empty")?;
    write_artifact(out_jwk, &serde_json::to_string_pretty(jwk)?)?;
    write_artifact(out_jwks, &key_set.to_json_pretty()?)?;

    println!("JWK written to: {}", out_jwk.display());
    println!("JWK Set written to: {}", out_jwks.display());
    if let Some(kid) = &jwk.common.key_id {
        println!("Key id: {}", kid);
    }
    Ok(())
}

fn create_jwt(config: &Config, key: Arc<SigningKeyPair>, out: &Path) -> Result<()> {
    let key_id = match &config.identity.key_id {
        Some(kid) => kid.clone(),
        None => key.thumbprint()?,
    };
    let assertion = AssertionBuilder::new(key, key_id, config.identity.claim_set())
        .with_validity(config.identity.validity()?)
        .sign()?;

    write_secret_artifact(out, assertion.as_str())?;
    println!("Assertion written to: {}", out.display());
    println!("Preview: {}", assertion.preview(50));
    println!("Expires at: {}", assertion.expires_at());
    Ok(())
}

fn inspect_jwt(token_path: &Path, jwks_path: Option<&Path>) -> Result<()> {
    let assertion = IdentityAssertion::decode(&read_artifact(token_path)?)?;

    println!("Header:\n{}", serde_json::to_string_pretty(assertion.header())?);
    println!("Claims:\n{}", serde_json::to_string_pretty(assertion.claims())?);
    println!("Issued at: {}", assertion.issued_at());
    println!("Expires at: {}", assertion.expires_at());
    if assertion.is_expired_at(Utc::now()) {
        println!("Status: expired");
    }

    if let Some(path) = jwks_path {
        let key_set = KeySet::from_json(&read_artifact(path)?)?;
        assertion.verify(&key_set, None)?;
        println!("Signature: valid ({})", path.display());
    }
    Ok(())
}

async fn exchange_token(
    config: &Config,
    token_path: &Path,
    out: &Path,
    deadline: Option<u64>,
) -> Result<()> {
    let assertion = IdentityAssertion::decode(&read_artifact(token_path)?)?;
    let client = ExchangeClient::from_config(&config.federation)?;
    debug!("Exchange client: {:?}", client);

    let outcome = match deadline {
        Some(seconds) => {
            client
                .exchange_until(&assertion, tokio::time::sleep(Duration::from_secs(seconds)))
                .await?
        }
        None => client.exchange(&assertion).await?,
    };

    write_secret_artifact(out, outcome.access.secret())?;
    println!("Access token written to: {}", out.display());
    println!("Expires at: {}", outcome.access.expires_at());
    Ok(())
}

async fn list_resources(config: &Config, token: &AccessToken) -> Result<ResourceList> {
    let client = ResourceClient::from_config(&config.resource, config.federation.request_timeout())?;
    let reference = ResourceRef::from_config(&config.resource);
    Ok(client.call(token, &reference).await?)
}

fn print_resources(config: &Config, list: &ResourceList) {
    println!(
        "{} {} in project {}:",
        list.len(),
        config.resource.collection,
        config.resource.project_id
    );
    if list.is_empty() {
        println!("{}", empty_listing_hint(&config.resource));
    }
    for name in list.names() {
        println!("- {}", name);
    }
    if !list.is_complete() {
        println!("(more results available)");
    }
}

/// What to tell the user when the listed collection is empty
fn empty_listing_hint(resource: &config::ResourceConfig) -> String {
    let mut hint = format!(
        "No {} found in project {}.",
        resource.collection, resource.project_id
    );
    if resource.endpoint.trim_end_matches('/') == DEFAULT_RESOURCE_ENDPOINT.trim_end_matches('/') {
        hint.push_str(&format!(
            "\nYou can create one with:\n  gcloud pubsub {} create test-{} --project={}",
            resource.collection,
            resource.collection.trim_end_matches('s'),
            resource.project_id
        ));
    }
    hint
}

async fn run_chain(config: &Config, out: Option<&Path>) -> Result<()> {
    let key = load_private_key(&config.keys.private_key_path)?;
    let pipeline = FederationPipeline::from_config(config, key)?;
    let cache = CredentialCache::new(pipeline, config.cache.safety_margin());

    let token = cache.get().await?;
    if let Some(path) = out {
        write_secret_artifact(path, token.secret())?;
        println!("Access token written to: {}", path.display());
    }

    let list = list_resources(config, &token).await?;
    print_resources(config, &list);
    Ok(())
}
