use cdp::config::CdpConfig;
use cdp::end_point::CdpEndPoint;
use cdp::message_handler::{MessageHandler, ReceivedKind};
use cdp::message_id::MessageId;
use cdp::packet_header::SendOptions;
use clap::Parser;
use clap_derive::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::select;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{info, warn, Level};

#[derive(Parser)]
struct Args {
    bind_address: String,

    /// send guaranteed messages to this peer
    #[clap(long)]
    peer: Option<String>,

    #[clap(long, default_value_t = 10)]
    count: u32,

    #[clap(long, default_value_t = 16)]
    tick_millis: u64,

    /// simulated packet loss in both directions
    #[clap(long, default_value_t = 0.0)]
    loss: f64,

    #[clap(short, long, default_value_t = false)]
    verbose: bool,

    #[clap(long, default_value_t = false)]
    very_verbose: bool,
}

struct LoggingHandler;

impl MessageHandler for LoggingHandler {
    fn on_message(&mut self, payload: &[u8], from: SocketAddr, message_id: MessageId, kind: ReceivedKind) {
        match kind {
            ReceivedKind::Status(status) => info!("{:?} from {:?}: {:?}", message_id, from, status),
            _ => info!("{:?} {:?} from {:?}: {}", kind, message_id, from, String::from_utf8_lossy(payload)),
        }
    }
}

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = match (args.verbose, args.very_verbose) {
        (_, true) => Level::TRACE,
        (true, _) => Level::DEBUG,
        (false, false) => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .try_init()
        .ok();

    let mut config = CdpConfig::new(args.bind_address.parse()?);
    config.loss_probability = args.loss;
    let end_point = CdpEndPoint::bind(Arc::new(config)).await?;

    let peer: Option<SocketAddr> = match &args.peer {
        Some(s) => Some(s.parse()?),
        None => None,
    };

    select! {
        result = run(&end_point, peer, args.count, Duration::from_millis(args.tick_millis)) => { result? }
        _ = tokio::signal::ctrl_c() => { info!("shutting down") }
    }

    end_point.log_stats();
    end_point.close();
    Ok(())
}

async fn run(end_point: &CdpEndPoint, peer: Option<SocketAddr>, count: u32, tick: Duration) -> anyhow::Result<()> {
    let mut handler = LoggingHandler;
    let mut ticks = interval(tick);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut num_sent = 0;
    let mut last_tick = Instant::now();
    loop {
        ticks.tick().await;
        let now = Instant::now();
        let dt = now - last_tick;
        last_tick = now;

        if let Some(peer) = peer {
            if num_sent < count {
                let message = format!("message #{} from {:?}", num_sent, end_point.self_addr());
                match end_point.send(message.as_bytes(), peer, SendOptions::guaranteed()).await {
                    Ok(receipt) => info!("sent message #{}: {:?}", num_sent, receipt),
                    Err(e) => warn!("error sending message #{}: {}", num_sent, e),
                }
                num_sent += 1;
            }
        }

        end_point.update_receive(dt, &mut handler).await;
        end_point.update_send_queue(dt, &mut handler);
    }
}
