use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use aliri_clock::{Clock, System, UnixTime};
use async_trait::async_trait;
use clap::Parser;
use tollgate::{
    cache::FileConfigCache,
    client::AuthClient,
    error::AcquireError,
    ingestion::HttpConfigIngestion,
    options::DEFAULT_CONFIG_BASE_URL,
    AccessToken, AccountId, AccountIdRef, ClientId, ConfigSnapshot, SessionCoordinator,
    SessionOptions, UserInfo,
};

#[derive(Debug, Parser)]
struct Opts {
    /// The application secret identifying the configuration document
    #[arg(short = 's', long, env, hide_env_values = true)]
    app_secret: String,

    /// The base URL of the configuration service
    #[arg(short, long, env, default_value = DEFAULT_CONFIG_BASE_URL)]
    config_base_url: String,

    /// The local file used to cache the configuration document
    #[arg(short = 'f', long, env, default_value = ".auth-config.json")]
    cache_file: std::path::PathBuf,

    /// How long, in seconds, the demo client's tokens remain valid
    #[arg(short, long, env, default_value_t = 360)]
    token_lifetime: u64,

    /// How long before expiry, in seconds, a token is refreshed
    #[arg(short, long, env, default_value_t = 300)]
    refresh_margin: u64,
}

/// Stands in for an identity provider's client, issuing opaque tokens
#[derive(Debug)]
struct DemoAuthClient {
    client_id: ClientId,
    lifetime: u64,
    issued: AtomicU64,
    accounts: Mutex<HashSet<AccountId>>,
}

impl DemoAuthClient {
    fn issue(&self, account: &AccountIdRef) -> UserInfo {
        let serial = self.issued.fetch_add(1, Ordering::Relaxed);
        let now = System.now();
        self.accounts
            .lock()
            .unwrap()
            .insert(account.to_owned());

        UserInfo {
            account_id: account.to_owned(),
            access_token: AccessToken::new(format!("{}.{}.{}", self.client_id, account, serial)),
            id_token: None,
            expires_on: Some(UnixTime(now.0 + self.lifetime)),
        }
    }
}

#[async_trait]
impl AuthClient for DemoAuthClient {
    async fn acquire_silently(&self, account: &AccountIdRef) -> Result<UserInfo, AcquireError> {
        if !self.has_account(account) {
            return Err(AcquireError::failed(format!("no session for {}", account)));
        }
        Ok(self.issue(account))
    }

    async fn acquire_interactively(&self) -> Result<UserInfo, AcquireError> {
        Ok(self.issue(AccountIdRef::from_static("demo-user")))
    }

    fn has_account(&self, account: &AccountIdRef) -> bool {
        self.accounts.lock().unwrap().contains(account)
    }

    fn remove_account(&self, account: &AccountIdRef) {
        self.accounts.lock().unwrap().remove(account);
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let options = SessionOptions::for_app_secret(&opts.config_base_url, &opts.app_secret)
        .with_refresh_margin(Duration::from_secs(opts.refresh_margin));
    let ingestion = HttpConfigIngestion::with_default_client()?;
    let cache = FileConfigCache::new(opts.cache_file);

    let lifetime = opts.token_lifetime;
    let factory = move |snapshot: &ConfigSnapshot| -> Result<Arc<dyn AuthClient>, AcquireError> {
        tracing::info!(
            client_id = %snapshot.config().client_id,
            authority = snapshot.config().default_authority().map(|a| a.url.as_str()),
            "building demo client"
        );
        Ok(Arc::new(DemoAuthClient {
            client_id: snapshot.config().client_id.clone(),
            lifetime,
            issued: AtomicU64::new(0),
            accounts: Mutex::new(HashSet::new()),
        }))
    };

    let coordinator = SessionCoordinator::new(options, cache, ingestion, factory);
    coordinator.start();
    coordinator.spawn_expiry_watch();

    let user = coordinator.sign_in().await?;
    tracing::info!(
        account_id = %user.account_id,
        token = format_args!("{:#?}", user.access_token),
        "signed in"
    );

    let mut watcher = coordinator.token_context().subscribe();
    loop {
        let token = watcher.changed().await?;
        tracing::info!(
            account_id = token.account_id().map(|a| a.as_str()),
            expires_on = token.expires_on().map(|e| e.0),
            phase = ?coordinator.phase(),
            "token renewed"
        );
    }
}
