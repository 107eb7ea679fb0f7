use std::{
    fs::{self, File},
    io::Write,
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use storefront_checkout::{
    backend::HttpStorefrontBackend,
    config::{self, CheckoutConfig},
    events::{self, Event, EventHandler, EventSender},
    models::{CartLine, CartSnapshot, DeliveryAddress, PaymentMethod, PriceBreakdown, SessionPhase},
    services::commerce::{
        cart_service::{CartAggregator, PricingPolicy},
        AddressResolver, CheckoutManager, CheckoutRequest, SessionSnapshot,
    },
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Parser)]
#[command(name = "checkout-cli", about = "Price carts and run storefront checkouts")]
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
    /// Print the price breakdown of a cart
    Quote(QuoteArgs),
    /// Submit an order and follow its payment session
    Pay(PayArgs),
}

#[derive(Args)]
struct QuoteArgs {
    /// JSON file with the cart lines
    #[arg(long)]
    cart: PathBuf,
    /// Loyalty points to redeem
    #[arg(long)]
    points: Option<i64>,
}

#[derive(Args)]
struct PayArgs {
    #[arg(long)]
    cart: PathBuf,
    /// JSON file with the shopper's delivery addresses
    #[arg(long)]
    addresses: PathBuf,
    /// Id of the delivery address to ship to; defaults to the preferred one
    #[arg(long)]
    address: Option<String>,
    /// CASH_ON_DELIVERY or BANK_TRANSFER
    #[arg(long)]
    method: PaymentMethod,
    #[arg(long)]
    user: String,
    #[arg(long)]
    points: Option<i64>,
    #[arg(long)]
    note: Option<String>,
    /// Bearer token, overrides api.auth_token
    #[arg(long, env = "CHECKOUT_TOKEN")]
    token: Option<String>,
    /// Append every checkout event to this file as JSON lines
    #[arg(long)]
    events: Option<PathBuf>,
}

/// Writes each event as one JSON line.
struct EventLog {
    file: Mutex<File>,
}

impl EventLog {
    fn open(path: &PathBuf) -> Result<Self> {
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl EventHandler for EventLog {
    async fn handle_event(&self, event: &Event) -> Result<(), String> {
        let line = serde_json::to_string(event).map_err(|e| e.to_string())?;
        let mut file = self.file.lock().map_err(|e| e.to_string())?;
        writeln!(file, "{}", line).map_err(|e| e.to_string())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CartFile {
    Lines(Vec<CartLine>),
    Snapshot(CartSnapshot),
}

impl From<CartFile> for CartSnapshot {
    fn from(file: CartFile) -> Self {
        match file {
            CartFile::Lines(lines) => CartSnapshot::new(lines),
            CartFile::Snapshot(snapshot) => snapshot,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config().context("failed to load checkout config")?;
    config::init_tracing(config.log_level(), config.log_json);

    match cli.command {
        Commands::Quote(args) => handle_quote(&config, args, cli.json),
        Commands::Pay(args) => handle_pay(config, args, cli.json).await,
    }
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn handle_quote(config: &CheckoutConfig, args: QuoteArgs, json: bool) -> Result<()> {
    let cart: CartSnapshot = read_json::<CartFile>(&args.cart)?.into();
    let aggregator = CartAggregator::new(PricingPolicy::from(&config.pricing));
    let breakdown = aggregator
        .compute(&cart, args.points)
        .map_err(|e| anyhow::anyhow!(e.user_message()))?;

    if json {
        print_json(&breakdown)?;
    } else {
        render_breakdown(&breakdown);
    }
    Ok(())
}

async fn handle_pay(mut config: CheckoutConfig, args: PayArgs, json: bool) -> Result<()> {
    if args.token.is_some() {
        config.api.auth_token = args.token.clone();
    }
    let cart: CartSnapshot = read_json::<CartFile>(&args.cart)?.into();
    let addresses: Vec<DeliveryAddress> = read_json(&args.addresses)?;

    let backend = Arc::new(
        HttpStorefrontBackend::new(&config.api).context("failed to build backend client")?,
    );
    let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
    match &args.events {
        Some(path) => {
            let handlers: Vec<Box<dyn EventHandler>> = vec![Box::new(EventLog::open(path)?)];
            tokio::spawn(events::dispatch_events(event_rx, handlers));
        }
        None => {
            tokio::spawn(events::process_events(event_rx));
        }
    }

    let selected_address = args.address.or_else(|| {
        AddressResolver::new()
            .preferred(&addresses)
            .map(|a| a.id.clone())
    });

    let manager = CheckoutManager::from_config(backend, &config, event_sender);
    let session = manager.begin().await;
    let mut snapshots = session.subscribe();

    let request = CheckoutRequest {
        user_id: args.user,
        cart,
        redeemed_points: args.points,
        addresses,
        selected_address,
        payment_method: Some(args.method),
        note: args.note,
    };

    if let Err(e) = session.submit(request).await {
        eprintln!("checkout did not start ({:?}): {}", e.kind(), e.user_message());
        if e.is_transport() {
            eprintln!("the store could not be reached; run the command again to retry");
        }
        render(&session.snapshot(), json)?;
        manager.end().await;
        return Ok(());
    }
    render(&session.snapshot(), json)?;
    if !session.phase().is_terminal() {
        println!("Type `paid` once the transfer is done, or press Ctrl-C to cancel.");
    }

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let mut last_phase = session.phase();
    while !session.phase().is_terminal() {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                if snapshot.phase != last_phase {
                    last_phase = snapshot.phase;
                    render(&snapshot, json)?;
                } else {
                    debug!(remaining = snapshot.remaining_seconds, "countdown tick");
                }
            }
            line = stdin.next_line(), if stdin_open => {
                match line? {
                    Some(input) if input.trim().eq_ignore_ascii_case("paid") => {
                        if let Err(e) = session.confirm_paid().await {
                            eprintln!("{}", e.user_message());
                        }
                    }
                    Some(_) => {}
                    None => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                session.cancel().await.ok();
            }
        }
    }

    let final_snapshot = session.snapshot();
    if final_snapshot.phase != last_phase {
        render(&final_snapshot, json)?;
    }
    manager.end().await;
    Ok(())
}

fn render(snapshot: &SessionSnapshot, json: bool) -> Result<()> {
    if json {
        return print_json(snapshot);
    }
    match snapshot.phase {
        SessionPhase::AwaitingPayment => {
            if let Some(reference) = &snapshot.payable_reference {
                println!(
                    "Transfer {} to account {} with description \"{}\" ({}s left)",
                    reference.amount,
                    reference.account_number,
                    reference.description,
                    snapshot.remaining_seconds
                );
                if let Some(payload) = reference.qr_payload() {
                    println!("QR / link: {}", payload);
                }
            }
        }
        phase => {
            let order = snapshot
                .order_id
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "-".to_string());
            println!("Checkout {} • order {}", phase, order);
            if let Some(error) = &snapshot.last_error {
                println!("  {}", error.user_message());
            }
        }
    }
    Ok(())
}

fn render_breakdown(breakdown: &PriceBreakdown) {
    println!("Subtotal: {}", breakdown.subtotal);
    println!("Discount: {}", breakdown.discount);
    println!("Shipping: {}", breakdown.shipping_fee);
    println!("Total:    {}", breakdown.total);
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
