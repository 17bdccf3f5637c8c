// ABOUTME: Minimal server: binds a TCP listener, registers "echo", adopts each accepted socket
// ABOUTME: Run alongside demos/echo_client.rs to exercise a real handshake + call over loopback TCP

use std::sync::Arc;

use bytes::Bytes;
use tchannel::{Channel, ChannelOptions, Direction, LocalIdentity};
use tokio::net::TcpListener;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

const LISTEN_ADDR: &str = "127.0.0.1:4040";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let channel = Channel::new(
        LocalIdentity {
            host_port: LISTEN_ADDR.into(),
            process_name: "echo_server".into(),
        },
        ChannelOptions::default(),
    );

    channel.register_service(
        Bytes::from_static(b"echo"),
        Arc::new(|_arg1, arg2, arg3, responder| {
            Box::pin(async move {
                responder.respond(None, arg2, arg3).await;
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        }),
    )?;

    let listener = TcpListener::bind(LISTEN_ADDR).await?;
    println!("echo_server listening on {LISTEN_ADDR}");

    loop {
        let (stream, peer_addr) = listener.accept().await?;
        channel.adopt(stream, Direction::In, peer_addr.to_string());
    }
}
