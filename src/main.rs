use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use alloy_primitives::{Address, Bytes, U256};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blobcast::{
    beacon::BeaconClient,
    commitment::KzgEngine,
    config::{
        parse_calldata, parse_quantity, ScanParams, ServerConfig, SlotPolicy, TxParams,
        UploadParams, DEFAULT_BLOBS_PER_TX, DEFAULT_CHAIN_ID, DEFAULT_GAS_LIMIT,
        DEFAULT_MAX_FEE_PER_BLOB_GAS, SECONDS_PER_SLOT,
    },
    fs,
    rpc::RpcClient,
    server::{self, DEFAULT_MAX_UPLOAD_SIZE},
    stream, submit,
};

#[derive(Parser, Debug)]
#[command(version, about = "store files in blobs and stream them back")]
struct Cli {
    #[arg(
        long,
        global = true,
        env = "BLOBCAST_BEACON_URL",
        default_value = "http://localhost:5052"
    )]
    beacon_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// upload a file and print the slot to download it from
    Upload {
        file: PathBuf,
        #[command(flatten)]
        upload: UploadArgs,
    },
    /// download the file that starts at a slot
    Download {
        #[arg(long)]
        slot: u64,
        #[arg(short, long)]
        output: PathBuf,
        #[command(flatten)]
        scan: ScanArgs,
    },
    /// serve uploads and downloads over HTTP
    Serve {
        #[arg(long, env = "BLOBCAST_LISTEN", default_value = "0.0.0.0:3000")]
        listen: SocketAddr,
        #[arg(long, env = "BLOBCAST_MAX_UPLOAD_SIZE", default_value_t = DEFAULT_MAX_UPLOAD_SIZE)]
        max_upload_size: usize,
        #[command(flatten)]
        upload: UploadArgs,
        #[command(flatten)]
        scan: ScanArgs,
    },
}

#[derive(Args, Debug)]
struct UploadArgs {
    #[arg(long, env = "BLOBCAST_RPC_URL", default_value = "http://localhost:8545")]
    rpc_url: String,
    #[arg(long, env = "BLOBCAST_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
    #[arg(long, env = "BLOBCAST_CHAIN_ID", default_value_t = DEFAULT_CHAIN_ID)]
    chain_id: u64,
    /// the recipient of every transaction, the zero address by default
    #[arg(long, env = "BLOBCAST_TO", default_value_t = Address::ZERO)]
    to: Address,
    #[arg(long, env = "BLOBCAST_VALUE", default_value_t = U256::ZERO)]
    value: U256,
    #[arg(long, env = "BLOBCAST_GAS_LIMIT", default_value_t = DEFAULT_GAS_LIMIT)]
    gas_limit: u64,
    /// in wei, decimal or `0x`-prefixed, asked to the node when omitted
    #[arg(long, env = "BLOBCAST_MAX_FEE_PER_GAS", value_parser = parse_quantity)]
    max_fee_per_gas: Option<u128>,
    /// in wei, the max fee per gas when omitted
    #[arg(long, env = "BLOBCAST_MAX_PRIORITY_FEE_PER_GAS", value_parser = parse_quantity)]
    max_priority_fee_per_gas: Option<u128>,
    #[arg(
        long,
        env = "BLOBCAST_MAX_FEE_PER_BLOB_GAS",
        value_parser = parse_quantity,
        default_value_t = DEFAULT_MAX_FEE_PER_BLOB_GAS
    )]
    max_fee_per_blob_gas: u128,
    /// `0x`-prefixed hex, or plain text
    #[arg(long, env = "BLOBCAST_CALLDATA", value_parser = parse_calldata)]
    calldata: Option<Bytes>,
    #[arg(long, env = "BLOBCAST_BLOBS_PER_TX", default_value_t = DEFAULT_BLOBS_PER_TX)]
    blobs_per_tx: usize,
    #[arg(long, env = "BLOBCAST_MAX_SUBMIT_ATTEMPTS", default_value_t = 3)]
    max_submit_attempts: usize,
    /// in seconds
    #[arg(long, env = "BLOBCAST_RECEIPT_TIMEOUT", default_value_t = 180)]
    receipt_timeout: u64,
    #[arg(long, env = "BLOBCAST_SECONDS_PER_SLOT", default_value_t = SECONDS_PER_SLOT)]
    seconds_per_slot: u64,
    /// e.g. `https://sepolia.etherscan.io`
    #[arg(long, env = "BLOBCAST_EXPLORER_URL")]
    explorer_url: Option<String>,
}

impl UploadArgs {
    fn params(self, beacon_url: String) -> UploadParams {
        UploadParams {
            rpc_url: self.rpc_url,
            beacon_url,
            private_key: self.private_key,
            tx: TxParams {
                chain_id: self.chain_id,
                to: self.to,
                value: self.value,
                gas_limit: self.gas_limit,
                max_fee_per_gas: self.max_fee_per_gas,
                max_priority_fee_per_gas: self.max_priority_fee_per_gas,
                max_fee_per_blob_gas: self.max_fee_per_blob_gas,
                calldata: self.calldata.unwrap_or_default(),
            },
            blobs_per_tx: self.blobs_per_tx,
            max_submit_attempts: self.max_submit_attempts,
            receipt_timeout: Duration::from_secs(self.receipt_timeout),
            seconds_per_slot: self.seconds_per_slot,
            explorer_url: self.explorer_url,
            ..UploadParams::default()
        }
    }
}

#[derive(Args, Debug)]
struct ScanArgs {
    #[arg(long, env = "BLOBCAST_SLOT_POLICY", value_enum, default_value_t = SlotPolicy::SkipMissed)]
    policy: SlotPolicy,
    /// in seconds
    #[arg(long, env = "BLOBCAST_POLL_INTERVAL", default_value_t = SECONDS_PER_SLOT)]
    poll_interval: u64,
    /// in seconds
    #[arg(long, env = "BLOBCAST_SLOT_TIMEOUT", default_value_t = 10 * SECONDS_PER_SLOT)]
    slot_timeout: u64,
    #[arg(long, env = "BLOBCAST_MAX_EMPTY_SLOTS", default_value_t = 64)]
    max_empty_slots: u64,
    /// dump the payload of every shard found in this directory
    #[arg(long, env = "BLOBCAST_DUMP_DIR")]
    dump_dir: Option<PathBuf>,
}

impl ScanArgs {
    fn params(self, beacon_url: String, start_slot: u64) -> ScanParams {
        ScanParams {
            policy: self.policy,
            poll_interval: Duration::from_secs(self.poll_interval),
            slot_timeout: Duration::from_secs(self.slot_timeout),
            max_empty_slots: self.max_empty_slots,
            dump_dir: self.dump_dir,
            ..ScanParams::new(beacon_url, start_slot)
        }
    }
}

/// a token that is cancelled on Ctrl-C
fn interruptible() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted");
            token.cancel();
        }
    });
    cancel
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Upload { file, upload } => {
            let params = upload.params(cli.beacon_url);
            let data = fs::read_file(&file)?;
            let execution = RpcClient::new(&params.rpc_url)?;
            let source = BeaconClient::new(&params.beacon_url)?;

            let report = submit::upload(
                data,
                &params,
                Arc::new(KzgEngine::ethereum()),
                &execution,
                &source,
                interruptible(),
            )
            .await
            .with_context(|| format!("could not upload `{:?}`", file))?;

            info!(
                shards = report.shards,
                transactions = report.transactions.len(),
                blob_gas_used = report.total_blob_gas_used,
                elapsed = ?report.elapsed,
                "upload done"
            );
            println!("{}", report.start_slot);
        }
        Command::Download { slot, output, scan } => {
            let params = scan.params(cli.beacon_url, slot);
            let source = Arc::new(BeaconClient::new(&params.beacon_url)?);
            let size = stream::download_to_file(source, params, &output, interruptible())
                .await
                .with_context(|| format!("could not download slot {}", slot))?;
            info!(size, "saved to `{:?}`", output);
        }
        Command::Serve {
            listen,
            max_upload_size,
            upload,
            scan,
        } => {
            let config = ServerConfig {
                listen,
                upload: upload.params(cli.beacon_url.clone()),
                scan: scan.params(cli.beacon_url, 0),
                max_upload_size,
            };
            // fail early rather than on the first upload
            config.upload.validate()?;
            server::serve(config).await?;
        }
    }

    Ok(())
}
