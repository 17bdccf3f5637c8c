// ABOUTME: Minimal client: calls "echo" on the server, dialing and handshaking automatically
// ABOUTME: Run alongside demos/echo_server.rs to exercise a real handshake + call over loopback TCP

use bytes::Bytes;
use tchannel::{Channel, ChannelOptions, LocalIdentity};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const SERVER_ADDR: &str = "127.0.0.1:4040";
const CLIENT_ADDR: &str = "127.0.0.1:4041";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let channel = Channel::new(
        LocalIdentity {
            host_port: CLIENT_ADDR.into(),
            process_name: "echo_client".into(),
        },
        ChannelOptions::default(),
    );

    // No connection to the server exists yet — `send` dials and completes
    // the init handshake itself before dispatching the call.
    let outcome = channel
        .send(
            SERVER_ADDR,
            Bytes::from_static(b"demo"),
            Bytes::from_static(b"echo"),
            Bytes::from_static(b"h"),
            Bytes::from_static(b"hello, tchannel"),
            Some(1000),
        )
        .await?;

    match outcome.error {
        None => println!(
            "echo reply: arg2={:?} arg3={:?}",
            outcome.arg2, outcome.arg3
        ),
        Some(e) => eprintln!("echo call failed: {e}"),
    }

    Ok(())
}
