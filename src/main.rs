use std::{process, sync::Arc};

use pitlane::{
    application::{
        error::AppError,
        lookups::{Catalog, FEED_HEAD, membership_key},
        providers::{
            FeedProvider, ListMembershipProvider, ProfileProvider, ProviderStatus,
            SessionProvider, VehicleFollowingProvider,
        },
    },
    cache::{CacheConfig, CacheValue, Lookup, MemoryStore, SessionCache, SessionStore, StoreKind},
    config::{self, Command, FeedArgs, ListToggleArgs, ListsArgs, ProfileArg},
    infra::{
        error::InfraError,
        file_store::FileStore,
        http::{ApiClient, Credentials},
        telemetry,
    },
};
use serde::Serialize;
use serde_json::json;
use tracing::{Dispatch, Level, debug, dispatcher, error};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt()
        .with_max_level(Level::ERROR)
        .with_writer(std::io::stderr)
        .finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    let cache = open_cache(&settings.cache)?;
    let client = ApiClient::new(&settings.api.base_url, Credentials::new())?;
    let catalog = Catalog::new(&cache, &client, &settings.cache);
    let session = SessionProvider::restore(&cache, &catalog);

    if let Some((token, identity)) = settings.session.credentials() {
        let known = session.credentials().token().as_deref() == Some(token)
            && session.identity().as_deref() == Some(identity);
        if !known {
            session.login(token, identity);
        }
    }

    let app = App { catalog, session };
    match cli_args.command.unwrap_or(Command::Session) {
        Command::Session => app.show_session().await,
        Command::Profile(arg) => app.show_profile(arg).await,
        Command::Followers(arg) => {
            let uuid = app.profile_target(arg)?;
            print_json(&resolve(&app.catalog.followers.lookup(uuid, false), "followers").await?)
        }
        Command::Following(arg) => {
            let uuid = app.profile_target(arg)?;
            print_json(&resolve(&app.catalog.following.lookup(uuid, false), "following").await?)
        }
        Command::Follow(arg) => app.toggle_follow(arg).await,
        Command::Vehicle(arg) => {
            let id = required(arg.vehicle_id, "vehicle id")?;
            print_json(&resolve(&app.catalog.vehicles.lookup(id, false), "vehicle").await?)
        }
        Command::FollowVehicle(arg) => app.toggle_vehicle_follow(arg.vehicle_id).await,
        Command::Vin(arg) => {
            let vin = required(arg.vin, "vin")?;
            print_json(&resolve(&app.catalog.vin_decodes.lookup(vin, false), "vin decode").await?)
        }
        Command::Recalls(arg) => {
            let vin = required(arg.vin, "vin")?;
            print_json(&resolve(&app.catalog.recalls.lookup(vin, false), "recalls").await?)
        }
        Command::Lists(args) => app.show_lists(args).await,
        Command::ListToggle(args) => app.toggle_membership(args).await,
        Command::Notifications => {
            app.require_session()?;
            print_json(&resolve(app.session.notification_count(), "notifications").await?)
        }
        Command::Feed(args) => app.show_feed(args).await,
        Command::Logout => {
            app.session.logout();
            print_json(&json!({ "signed_out": true }))
        }
    }
}

fn open_cache(config: &CacheConfig) -> Result<SessionCache, AppError> {
    let backend: Arc<dyn SessionStore> = match config.store {
        StoreKind::File => Arc::new(FileStore::open(&config.directory).map_err(InfraError::from)?),
        StoreKind::Memory => Arc::new(match config.quota_bytes {
            Some(quota) => MemoryStore::with_quota(quota),
            None => MemoryStore::new(),
        }),
    };
    debug!(store = ?config.store, directory = %config.directory.display(), "Session cache opened");
    Ok(SessionCache::new(backend))
}

struct App {
    catalog: Catalog,
    session: SessionProvider,
}

impl App {
    fn require_session(&self) -> Result<String, AppError> {
        match self.session.identity() {
            Some(identity) if self.session.is_authenticated() => Ok(identity),
            _ => Err(AppError::validation(
                "not signed in; pass --token and --identity",
            )),
        }
    }

    fn profile_target(&self, arg: ProfileArg) -> Result<String, AppError> {
        match arg.uuid {
            Some(uuid) => required(uuid, "profile uuid"),
            None => self.require_session(),
        }
    }

    async fn show_session(&self) -> Result<(), AppError> {
        let identity = self.require_session()?;
        if self.session.settled().await != ProviderStatus::Loaded {
            return Err(AppError::unavailable("session", identity));
        }
        let unread = resolve(self.session.notification_count(), "notifications").await?;
        print_json(&json!({
            "identity": identity,
            "profile": self.session.profile().value(),
            "unread_notifications": unread.unread,
        }))
    }

    async fn show_profile(&self, arg: ProfileArg) -> Result<(), AppError> {
        let uuid = self.profile_target(arg)?;
        let provider = ProfileProvider::new(&self.catalog, &uuid);
        if !provider.settled().await.is_loaded() {
            return Err(AppError::unavailable("profile", uuid));
        }
        let is_following = if self.session.is_authenticated() {
            provider.follow().settled().await.value
        } else {
            None
        };
        let followers = provider.followers().settled().await.value;
        let vehicles = provider.vehicles().settled().await.value;
        print_json(&json!({
            "profile": provider.profile().value(),
            "is_following": is_following,
            "followers": followers,
            "vehicles": vehicles,
        }))
    }

    async fn toggle_follow(&self, arg: ProfileArg) -> Result<(), AppError> {
        self.require_session()?;
        let uuid = match arg.uuid {
            Some(uuid) => required(uuid, "profile uuid")?,
            None => return Err(AppError::validation("profile uuid is required")),
        };
        let relationship = self.catalog.follows.watch(uuid.as_str(), false);
        relationship.settled().await;
        let committed = relationship.toggle().await;
        print_json(&json!({
            "uuid": uuid,
            "committed": committed,
            "is_following": relationship.value(),
        }))
    }

    async fn toggle_vehicle_follow(&self, vehicle_id: String) -> Result<(), AppError> {
        let identity = self.require_session()?;
        let vehicle_id = required(vehicle_id, "vehicle id")?;
        let mut provider = VehicleFollowingProvider::new(&self.catalog, &identity);
        provider.settled().await;
        provider.watch(&vehicle_id).settled().await;
        let committed = provider.toggle(&vehicle_id).await;
        print_json(&json!({
            "vehicle_id": vehicle_id,
            "committed": committed,
            "is_following": provider.is_following(&vehicle_id),
            "following": provider.vehicles(),
        }))
    }

    async fn show_lists(&self, args: ListsArgs) -> Result<(), AppError> {
        let owner = self.profile_target(ProfileArg { uuid: args.owner })?;
        let Some(item) = args.item else {
            return print_json(&resolve(&self.catalog.lists.lookup(owner, false), "lists").await?);
        };

        self.require_session()?;
        let item = required(item, "item id")?;
        let mut provider = ListMembershipProvider::new(&self.catalog, &owner, item.as_str());
        if provider.load().await == ProviderStatus::Error {
            return Err(AppError::unavailable("lists", owner));
        }
        provider.settled().await;
        let lists: Vec<_> = provider
            .lists()
            .into_iter()
            .map(|list| {
                let contains = provider.contains(&list.list_id);
                json!({ "list": list, "contains": contains })
            })
            .collect();
        print_json(&json!({ "item_id": item, "lists": lists }))
    }

    async fn toggle_membership(&self, args: ListToggleArgs) -> Result<(), AppError> {
        self.require_session()?;
        let list_id = required(args.list_id, "list id")?;
        let item_id = required(args.item_id, "item id")?;
        let relationship = self
            .catalog
            .memberships
            .watch(membership_key(&list_id, &item_id), false);
        relationship.settled().await;
        let committed = relationship.toggle().await;
        print_json(&json!({
            "list_id": list_id,
            "item_id": item_id,
            "committed": committed,
            "contains": relationship.value(),
        }))
    }

    async fn show_feed(&self, args: FeedArgs) -> Result<(), AppError> {
        self.require_session()?;
        let feed = FeedProvider::new(&self.catalog);
        let mut status = if args.reload {
            feed.reload().await
        } else {
            feed.load().await
        };
        for _ in 1..args.pages {
            if feed.state().next_cursor.is_none() {
                break;
            }
            status = feed.load_more().await;
        }
        if status == ProviderStatus::Error {
            return Err(AppError::unavailable("feed", FEED_HEAD));
        }
        print_json(&feed.state())
    }
}

fn required(value: String, what: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::validation(format!("{what} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Waits for a lookup to settle and returns its value, failing on `Error`.
async fn resolve<V: CacheValue>(lookup: &Lookup<V>, operation: &'static str) -> Result<V, AppError> {
    let state = lookup.settled().await;
    match state.value {
        Some(value) if state.is_success() => Ok(value),
        _ => Err(AppError::unavailable(operation, lookup.key())),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::unexpected(format!("failed to render output: {err}")))?;
    println!("{rendered}");
    Ok(())
}
