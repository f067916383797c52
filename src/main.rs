use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use filewire::{
    init_logger, FileOutcome, ResumeMode, Session, SessionConfig, TcpTransport, TxMode,
};
use log::info;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "filewire")]
#[command(about = "Reliable file transfer over point-to-point byte links")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum ResumeArg {
    Never,
    SkipExisting,
    CrcTail,
    CrcTailOrZero,
    CrcFull,
    CrcFullOrZero,
}

impl From<ResumeArg> for ResumeMode {
    fn from(arg: ResumeArg) -> ResumeMode {
        match arg {
            ResumeArg::Never => ResumeMode::Never,
            ResumeArg::SkipExisting => ResumeMode::SkipExisting,
            ResumeArg::CrcTail => ResumeMode::CrcTail,
            ResumeArg::CrcTailOrZero => ResumeMode::CrcTailOrZero,
            ResumeArg::CrcFull => ResumeMode::CrcFull,
            ResumeArg::CrcFullOrZero => ResumeMode::CrcFullOrZero,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Send files to a listening peer
    Send {
        /// Peer address, e.g. 192.168.1.20:9000
        #[arg(short, long)]
        connect: String,
        /// Proposed packet size in bytes
        #[arg(short, long, default_value = "4096")]
        packet_size: usize,
        /// Files to transfer
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Receive files from a connecting peer
    Recv {
        /// Listen address, e.g. 0.0.0.0:9000
        #[arg(short, long)]
        listen: String,
        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
        /// Resume policy for files already present
        #[arg(long, value_enum, default_value = "crc-tail-or-zero")]
        resume: ResumeArg,
        /// Proposed packet size in bytes
        #[arg(short, long, default_value = "4096")]
        packet_size: usize,
    },
}

fn progress_config(mut cfg: SessionConfig) -> SessionConfig {
    cfg.adaptive.max_performance_mode = TxMode::Window64;
    cfg.callbacks.on_file_start = Some(Box::new(|name, _path, size, resume| {
        if resume > 0 {
            info!("{name}: {size} bytes, resuming at {resume}");
        } else {
            info!("{name}: {size} bytes");
        }
    }));
    cfg.callbacks.on_file_complete = Some(Box::new(|name, _path, outcome| match outcome {
        FileOutcome::Completed => info!("{name}: done"),
        FileOutcome::Skipped => info!("{name}: skipped"),
        FileOutcome::Aborted => info!("{name}: aborted"),
        FileOutcome::Failed(code) => info!("{name}: failed (status {code})"),
    }));
    cfg
}

fn main() -> anyhow::Result<()> {
    init_logger();
    let cli = Cli::parse();

    match cli.command {
        Commands::Send { connect, packet_size, files } => {
            let transport =
                TcpTransport::connect(&connect).with_context(|| format!("connecting to {connect}"))?;
            let cfg = progress_config(SessionConfig { packet_size, ..SessionConfig::default() });
            let mut session = Session::new(Box::new(transport), cfg)?;
            session.send_files(&files, None)?;
            info!("all files sent");
        }
        Commands::Recv { listen, output, resume, packet_size } => {
            let transport =
                TcpTransport::accept(&listen).with_context(|| format!("listening on {listen}"))?;
            let mut cfg = progress_config(SessionConfig { packet_size, ..SessionConfig::default() });
            cfg.resume.mode = resume.into();
            let mut session = Session::new(Box::new(transport), cfg)?;
            session.receive_files(&output)?;
            info!("batch received into {}", output.display());
        }
    }
    Ok(())
}
