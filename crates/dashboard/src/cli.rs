use crate::api::{ApiClient, ApiRequest, Transport, STATUS_PATH};
use crate::detail::fetch_detail;
use crate::feeds::{Feed, ListFeed, StatusFeed};
use crate::poller::{FilteredView, Poller, ViewState};
use crate::query::FilterState;
use crate::session::{CredentialStore, ProfileStatus, SessionManager};
use crate::watchlist::WatchlistController;
use anyhow::{Context as _, Result};
use chrono::{DateTime, TimeDelta, Utc};
use common::types::{EventRecord, StatusRecord};
use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Read before prompting on stdin, for scripted logins.
pub const PASSWORD_ENV_VAR: &str = "ETHBOT_DASHBOARD_PASSWORD";

const USAGE: &str = "usage: ethbot-dashboard [watch [events|history|alerts|all] [--q=..] \
[--min-liquidity=..] [--ownership=true|false] [--honeypot=true|false] [--start-ms=..] \
[--end-ms=..] [--last-mins=..] [--today] | status | token <address> | login <username> | \
register <username> | logout | whoami | watchlist [list|add <address>|remove <address>]]";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchTarget {
    Events,
    History,
    Alerts,
    All,
}

/// Relative time range, resolved against the clock when the view mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    LastMinutes(i64),
    Today,
}

impl Window {
    /// Out-of-range minute counts resolve to no time range at all.
    pub fn apply(self, filter: FilterState, now: DateTime<Utc>) -> FilterState {
        match self {
            Self::LastMinutes(mins) => match TimeDelta::try_minutes(mins) {
                Some(window) => filter.within_last(now, window),
                None => filter.with_range(None, None),
            },
            Self::Today => filter.since_start_of_day(now),
        }
    }
}

fn minutes_reachable(mins: i64, now: DateTime<Utc>) -> bool {
    TimeDelta::try_minutes(mins)
        .and_then(|window| now.checked_sub_signed(window))
        .is_some()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchlistOp {
    List,
    Add(String),
    Remove(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Watch {
        target: WatchTarget,
        filter: FilterState,
        window: Option<Window>,
    },
    Status,
    Token { address: String },
    Login { username: String },
    Register { username: String },
    Logout,
    Whoami,
    Watchlist(WatchlistOp),
}

pub fn parse_args<I>(mut args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    // Drop argv[0].
    let _ = args.next();

    let Some(cmd) = args.next() else {
        return Ok(Command::Watch {
            target: WatchTarget::All,
            filter: FilterState::default(),
            window: None,
        });
    };

    match cmd.as_str() {
        "watch" => parse_watch(args),
        "status" => Ok(Command::Status),
        "token" => {
            let address = args
                .next()
                .ok_or_else(|| "usage: ethbot-dashboard token <address>".to_string())?;
            Ok(Command::Token { address })
        }
        "login" => {
            let username = args
                .next()
                .ok_or_else(|| "usage: ethbot-dashboard login <username>".to_string())?;
            Ok(Command::Login { username })
        }
        "register" => {
            let username = args
                .next()
                .ok_or_else(|| "usage: ethbot-dashboard register <username>".to_string())?;
            Ok(Command::Register { username })
        }
        "logout" => Ok(Command::Logout),
        "whoami" => Ok(Command::Whoami),
        "watchlist" => {
            let op = match args.next().as_deref() {
                None | Some("list") => WatchlistOp::List,
                Some("add") => WatchlistOp::Add(args.next().ok_or_else(|| {
                    "usage: ethbot-dashboard watchlist add <address>".to_string()
                })?),
                Some("remove") => WatchlistOp::Remove(args.next().ok_or_else(|| {
                    "usage: ethbot-dashboard watchlist remove <address>".to_string()
                })?),
                Some(other) => return Err(format!("unknown watchlist action: {other}")),
            };
            Ok(Command::Watchlist(op))
        }
        "help" | "--help" | "-h" => Err(USAGE.to_string()),
        other => Err(format!("unknown command: {other}\n{USAGE}")),
    }
}

fn parse_watch<I>(args: I) -> std::result::Result<Command, String>
where
    I: Iterator<Item = String>,
{
    let mut target = WatchTarget::All;
    let mut filter = FilterState::default();
    let mut window = None;

    for arg in args {
        let Some(flag) = arg.strip_prefix("--") else {
            target = match arg.as_str() {
                "events" => WatchTarget::Events,
                "history" => WatchTarget::History,
                "alerts" => WatchTarget::Alerts,
                "all" => WatchTarget::All,
                other => return Err(format!("unknown watch target: {other}")),
            };
            continue;
        };
        let (name, value) = flag.split_once('=').unwrap_or((flag, ""));
        match name {
            "q" => filter = filter.with_text(value),
            "min-liquidity" => filter = filter.with_min_liquidity_input(value),
            "ownership" => filter = filter.with_ownership_renounced(Some(parse_bool(name, value)?)),
            "honeypot" => filter = filter.with_honeypot(Some(parse_bool(name, value)?)),
            "start-ms" => filter.start_ms = Some(parse_i64(name, value)?),
            "end-ms" => filter.end_ms = Some(parse_i64(name, value)?),
            "last-mins" => {
                let mins = parse_i64(name, value)?;
                if mins <= 0 {
                    return Err("--last-mins must be > 0".to_string());
                }
                if !minutes_reachable(mins, Utc::now()) {
                    return Err(format!("--last-mins={mins} reaches past the supported date range"));
                }
                window = Some(Window::LastMinutes(mins));
            }
            "today" => window = Some(Window::Today),
            other => return Err(format!("unknown flag: --{other}")),
        }
    }

    Ok(Command::Watch {
        target,
        filter,
        window,
    })
}

fn parse_bool(name: &str, value: &str) -> std::result::Result<bool, String> {
    match value {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(format!("--{name} expects true or false, got {value:?}")),
    }
}

fn parse_i64(name: &str, value: &str) -> std::result::Result<i64, String> {
    value
        .parse()
        .map_err(|e| format!("--{name} expects an integer, got {value:?}: {e}"))
}

/// What a command needs to run.
pub struct Context<T, S> {
    pub api: ApiClient<T>,
    pub session: SessionManager<T, S>,
    pub period: Duration,
}

pub async fn run_command<T: Transport, S: CredentialStore>(
    ctx: &Context<T, S>,
    cmd: Command,
) -> Result<()> {
    match cmd {
        Command::Watch {
            target,
            filter,
            window,
        } => {
            let filter = match window {
                Some(w) => w.apply(filter, Utc::now()),
                None => filter,
            };
            watch_views(ctx, target, &filter).await
        }
        Command::Status => show_status(ctx).await,
        Command::Token { address } => show_token(ctx, &address).await,
        Command::Login { username } => {
            let password = read_password()?;
            let outcome = ctx.session.login(&username, &password).await?;
            print_login(&username, &outcome.profile);
            Ok(())
        }
        Command::Register { username } => {
            let password = read_password()?;
            let outcome = ctx.session.register(&username, &password).await?;
            println!("Registered {username}");
            print_login(&username, &outcome.profile);
            Ok(())
        }
        Command::Logout => {
            ctx.session.logout().await;
            println!("Logged out");
            Ok(())
        }
        Command::Whoami => {
            if ctx.session.session().token.is_none() {
                println!("Not logged in");
                return Ok(());
            }
            match ctx.session.refresh_profile().await {
                ProfileStatus::Resolved(name) => println!("Logged in as {name}"),
                ProfileStatus::Unresolved => println!("Logged in (username unavailable)"),
            }
            Ok(())
        }
        Command::Watchlist(op) => {
            let controller = WatchlistController::new(ctx.api.clone(), ctx.session.reader());
            let addresses = match op {
                WatchlistOp::List => controller.list().await?,
                WatchlistOp::Add(address) => controller.add(&address).await?,
                WatchlistOp::Remove(address) => controller.remove(&address).await?,
            };
            println!("Watchlist ({}):", addresses.len());
            for a in addresses {
                println!("  {a}");
            }
            Ok(())
        }
    }
}

fn print_login(username: &str, profile: &ProfileStatus) {
    match profile {
        ProfileStatus::Resolved(name) => println!("Logged in as {name}"),
        ProfileStatus::Unresolved => println!("Logged in as {username} (profile unavailable)"),
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV_VAR) {
        return Ok(password);
    }
    eprint!("password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("failed to read password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

async fn show_status<T: Transport, S>(ctx: &Context<T, S>) -> Result<()> {
    let body = ctx.api.json(ApiRequest::get("status", STATUS_PATH)).await?;
    for StatusRecord { status } in StatusFeed.decode(body)? {
        println!("Backend status: {status}");
    }
    Ok(())
}

async fn show_token<T: Transport, S: CredentialStore>(
    ctx: &Context<T, S>,
    address: &str,
) -> Result<()> {
    let detail = fetch_detail(&ctx.api, address, ctx.session.reader().bearer()).await?;
    let token = detail.event.primary_token();
    println!("Token {address}");
    println!("  name:       {}", token.name.as_deref().unwrap_or("-"));
    println!("  symbol:     {}", token.symbol.as_deref().unwrap_or("-"));
    println!("  pair:       {}", detail.pair_address);
    println!("  liquidity:  {:.4} ETH", detail.event.liquidity_eth);
    println!("  honeypot:   {}", detail.event.honeypot);
    println!("  renounced:  {}", detail.event.ownership_renounced);
    if let Some(at) = detail.event.observed_at() {
        println!("  observed:   {}", at.to_rfc3339());
    }
    if !detail.raw.is_null() {
        println!("{}", serde_json::to_string_pretty(&detail.raw)?);
    }
    Ok(())
}

fn filtered<F: Feed, T: Transport>(
    feed: F,
    ctx: &Context<T, impl CredentialStore>,
    filter: &FilterState,
) -> FilteredView<F, T> {
    let poller = Poller::new(feed, ctx.api.clone(), ctx.session.reader(), ctx.period);
    let mut view = FilteredView::new(poller);
    view.set_filter(filter.clone());
    view.mount();
    view
}

fn spawn_printer<R>(
    label: &'static str,
    mut rx: watch::Receiver<ViewState<R>>,
    print: fn(&'static str, &[R]),
) -> JoinHandle<()>
where
    R: Send + Sync + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let records = Arc::clone(&rx.borrow_and_update().records);
            print(label, &records);
        }
    })
}

fn print_events(label: &'static str, records: &[EventRecord]) {
    println!("── {label}: {} records", records.len());
    for r in records.iter().take(15) {
        let token = r.primary_token();
        let at = r
            .observed_at()
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_default();
        println!(
            "  {at:>8}  {symbol:<12} liq={liq:>9.3}  honeypot={hp:<5}  renounced={ro:<5}  {addr}",
            symbol = token.symbol.as_deref().unwrap_or("?"),
            liq = r.liquidity_eth,
            hp = r.honeypot,
            ro = r.ownership_renounced,
            addr = r.selection_key().unwrap_or("-"),
        );
    }
}

fn print_alerts(label: &'static str, alerts: &[String]) {
    println!("── {label}: {} alerts", alerts.len());
    for a in alerts.iter().take(15) {
        println!("  {a}");
    }
}

fn print_status(_label: &'static str, records: &[StatusRecord]) {
    for r in records {
        println!("── backend: {}", r.status);
    }
}

async fn watch_views<T: Transport, S: CredentialStore>(
    ctx: &Context<T, S>,
    target: WatchTarget,
    filter: &FilterState,
) -> Result<()> {
    let wants = |t: WatchTarget| target == WatchTarget::All || target == t;
    let mut printers = Vec::new();

    let status = filtered(StatusFeed, ctx, filter);
    printers.push(spawn_printer("status", status.subscribe(), print_status));

    let events = wants(WatchTarget::Events).then(|| filtered(ListFeed::token_events(), ctx, filter));
    if let Some(v) = &events {
        printers.push(spawn_printer("token events", v.subscribe(), print_events));
    }
    let history = wants(WatchTarget::History).then(|| filtered(ListFeed::historical(), ctx, filter));
    if let Some(v) = &history {
        printers.push(spawn_printer("historical", v.subscribe(), print_events));
    }
    let alerts = wants(WatchTarget::Alerts).then(|| filtered(ListFeed::wallet_alerts(), ctx, filter));
    if let Some(v) = &alerts {
        printers.push(spawn_printer("wallet alerts", v.subscribe(), print_alerts));
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    tracing::info!("shutting down views");

    drop((status, events, history, alerts));
    for p in printers {
        p.abort();
    }
    Ok(())
}
