//! `mungetool`: a minimal round-trip client for exercising a running
//! `munged` over its Unix-domain socket, useful by hand and from the
//! integration tests. The full encode/decode/stress command-line front
//! ends are external collaborators (spec §1) and are not reimplemented
//! here; this is a thin demonstration client over the same wire protocol.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

use munge_core::error::ErrorKind;
use munge_core::wire::{
    Choice, DecodeRequest, DecodeResponse, EncodeRequest, EncodeResponse, Frame, MessageType, HEADER_LEN,
};

#[derive(Parser, Debug)]
#[command(name = "mungetool")]
#[command(about = "Minimal MUNGE encode/decode client")]
struct Args {
    /// Path to the daemon's listening socket
    #[arg(long, default_value = "/var/run/munge/munge.socket.2")]
    socket: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask the daemon to encode a credential carrying the given payload
    Encode {
        /// Payload string to embed in the credential
        #[arg(default_value = "")]
        payload: String,

        /// Credential time-to-live in seconds (0 = daemon default)
        #[arg(long, default_value = "0")]
        ttl: u32,
    },
    /// Ask the daemon to decode an armored credential string
    Decode {
        /// The `MUNGE:...:`-armored credential, e.g. piped from `encode`
        credential: String,
    },
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("mungetool: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    match args.command {
        Command::Encode { payload, ttl } => encode(&args.socket, payload, ttl),
        Command::Decode { credential } => decode(&args.socket, credential),
    }
}

fn encode(socket: &std::path::Path, payload: String, ttl: u32) -> Result<(), Box<dyn std::error::Error>> {
    let request = EncodeRequest {
        ttl: if ttl == 0 { Choice::Default } else { Choice::Explicit(ttl) },
        data: payload.into_bytes(),
        ..EncodeRequest::default()
    };
    let frame = Frame {
        msg_type: MessageType::EncodeRequest,
        retry: 0,
        payload: request.pack(),
    };

    let response_frame = round_trip(socket, frame)?;
    let response = EncodeResponse::unpack(&response_frame.payload)?;
    match response.armored {
        Some(armored) => {
            println!("{}", armored);
            Ok(())
        }
        None => {
            let (kind, message) = response.error.unwrap_or((0, "unknown error".into()));
            Err(format!("encode failed ({}): {}", describe_kind(kind), message).into())
        }
    }
}

fn decode(socket: &std::path::Path, credential: String) -> Result<(), Box<dyn std::error::Error>> {
    let request = DecodeRequest {
        armored: credential.trim().to_string(),
    };
    let frame = Frame {
        msg_type: MessageType::DecodeRequest,
        retry: 0,
        payload: request.pack(),
    };

    let response_frame = round_trip(socket, frame)?;
    let response = DecodeResponse::unpack(&response_frame.payload)?;
    let m = &response.metadata;
    println!("UID:       {}", m.cred_uid);
    println!("GID:       {}", m.cred_gid);
    println!("ENCODE_TIME: {}", m.encode_time);
    println!("DECODE_TIME: {}", m.decode_time);
    println!("TTL:       {}", m.ttl);
    println!("PAYLOAD:   {}", String::from_utf8_lossy(&m.data));

    if let Some(kind) = response.error_kind {
        Err(format!("decode reported ({}): {}", describe_kind(kind), response.error_message).into())
    } else {
        Ok(())
    }
}

fn round_trip(socket: &std::path::Path, frame: Frame) -> Result<Frame, Box<dyn std::error::Error>> {
    let mut stream = UnixStream::connect(socket)?;
    stream.write_all(&frame.pack())?;

    let mut header = [0u8; HEADER_LEN];
    stream.read_exact(&mut header)?;
    let payload_len = Frame::peek_payload_len(&header)?;
    let mut rest = vec![0u8; payload_len];
    stream.read_exact(&mut rest)?;

    let mut buf = Vec::with_capacity(HEADER_LEN + payload_len);
    buf.extend_from_slice(&header);
    buf.extend_from_slice(&rest);
    Ok(Frame::unpack(&buf)?)
}

fn describe_kind(code: u8) -> String {
    match ErrorKind::from_u8(code) {
        Some(kind) => kind.to_string(),
        None => format!("unknown error code {}", code),
    }
}
