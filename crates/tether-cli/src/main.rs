//! Tether CLI tools: key generation, handshake listener and dialer.

#![forbid(unsafe_code)]

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use tether_noise::{FramedConn, HandshakeConfig, IdentityKeypair, PeerId, Session};

#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Tether CLI tools")]
struct Cli {
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a new Ed25519 identity keypair
    Keygen {
        /// Output file path (without extension)
        #[arg(short, long, default_value = "tether")]
        output: String,
    },

    /// Show the peer id of a public key file
    ShowId {
        /// Public key file path
        #[arg(short, long)]
        key: String,
    },

    /// Accept connections and echo one encrypted message per peer
    Listen {
        /// Listen address (host:port)
        #[arg(short, long, default_value = "127.0.0.1:7700")]
        addr: String,

        /// Private key file path
        #[arg(short, long)]
        key: String,

        #[command(flatten)]
        handshake: HandshakeArgs,
    },

    /// Connect to a listener and send one encrypted message
    Dial {
        /// Listener address (host:port)
        #[arg(short, long)]
        addr: String,

        /// Private key file path
        #[arg(short, long)]
        key: String,

        /// Peer id the listener must prove
        #[arg(short, long)]
        expect: Option<String>,

        /// Message to send
        #[arg(short, long, default_value = "hello")]
        message: String,

        #[command(flatten)]
        handshake: HandshakeArgs,
    },
}

#[derive(Args, Debug)]
struct HandshakeArgs {
    /// JSON file with handshake settings
    #[arg(long, env = "TETHER_CONFIG")]
    config: Option<PathBuf>,

    /// Handshake deadline in milliseconds (overrides the config file)
    #[arg(long, env = "TETHER_HANDSHAKE_TIMEOUT_MS")]
    timeout_ms: Option<u64>,
}

impl HandshakeArgs {
    fn load(&self) -> Result<HandshakeConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .with_context(|| format!("failed to read {}", path.display()))?;
                serde_json::from_str(&raw)
                    .with_context(|| format!("invalid handshake config {}", path.display()))?
            }
            None => HandshakeConfig::default(),
        };

        if let Some(timeout_ms) = self.timeout_ms {
            config.handshake_timeout_ms = timeout_ms;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    tether_common::init_tracing(&cli.log_level);

    match cli.command {
        Command::Keygen { output } => {
            println!("Generating Ed25519 keypair...");

            let keypair = IdentityKeypair::generate();

            let private_path = format!("{}.key", output);
            let public_path = format!("{}.pub", output);

            keypair.save(&private_path, &public_path)?;

            println!("Private key: {}", private_path);
            println!("Public key:  {}", public_path);
            println!("Peer ID:     {}", keypair.peer_id());
        }
        Command::ShowId { key } => {
            let public_key = IdentityKeypair::load_public(&key)?;
            println!("{}", public_key.peer_id());
        }
        Command::Listen {
            addr,
            key,
            handshake,
        } => {
            let identity = Arc::new(IdentityKeypair::load(&key)?);
            let config = handshake.load()?;
            listen(&addr, identity, config).await?;
        }
        Command::Dial {
            addr,
            key,
            expect,
            message,
            handshake,
        } => {
            let identity = IdentityKeypair::load(&key)?;
            let expected = expect.as_deref().map(PeerId::parse).transpose()?;
            let config = handshake.load()?;
            let reply = dial(&addr, &identity, expected, config, message.as_bytes()).await?;
            println!("{}", String::from_utf8_lossy(&reply));
        }
    }

    Ok(())
}

async fn listen(addr: &str, identity: Arc<IdentityKeypair>, config: HandshakeConfig) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        "listening on {} as {}",
        listener.local_addr()?,
        identity.peer_id()
    );

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("shutting down");
                return Ok(());
            }
        };

        let identity = Arc::clone(&identity);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = serve(stream, &identity, config).await {
                warn!("connection from {} failed: {:#}", peer_addr, e);
            }
        });
    }
}

async fn serve(stream: TcpStream, identity: &IdentityKeypair, config: HandshakeConfig) -> Result<()> {
    let mut conn = FramedConn::new(stream);

    let mut session = Session::responder(identity)?.with_config(config)?;
    if let Err(e) = session.run(&mut conn).await {
        let _ = conn.into_inner().shutdown().await;
        return Err(e.into());
    }
    let mut secured = session
        .into_secured()
        .ok_or_else(|| anyhow!("handshake finished without a secured session"))?;

    let request = conn.read_frame().await?;
    let plaintext = secured.decrypt(&request)?;
    info!(
        "{} says: {}",
        secured.remote_peer_id(),
        String::from_utf8_lossy(&plaintext)
    );

    let reply = secured.encrypt(&plaintext)?;
    conn.write_frame(&reply).await?;
    Ok(())
}

async fn dial(
    addr: &str,
    identity: &IdentityKeypair,
    expected: Option<PeerId>,
    config: HandshakeConfig,
    message: &[u8],
) -> Result<Vec<u8>> {
    let stream = TcpStream::connect(addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;
    let mut conn = FramedConn::new(stream);

    let mut session = Session::initiator(identity, expected)?.with_config(config)?;
    if let Err(e) = session.run(&mut conn).await {
        let _ = conn.into_inner().shutdown().await;
        return Err(anyhow::Error::new(e).context(format!("handshake with {} failed", addr)));
    }
    let mut secured = session
        .into_secured()
        .ok_or_else(|| anyhow!("handshake finished without a secured session"))?;
    info!("secured channel to {}", secured.remote_peer_id());

    let ciphertext = secured.encrypt(message)?;
    conn.write_frame(&ciphertext).await?;

    let reply = conn.read_frame().await?;
    Ok(secured.decrypt(&reply)?)
}
