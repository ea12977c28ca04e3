//! Runs a handshake pattern over a framed duplex.
//!
//! Each pattern walks its schedule phase by phase, writing or reading one
//! length-prefixed frame per Noise message, attaching the signed identity
//! payload to each side's final message and verifying the peer's on
//! receipt. IK initiator failures come back as an explicit outcome variant
//! carrying everything XXfallback needs, not as bare errors.

use tracing::debug;

use crate::error::Error;
use crate::framing::{read_frame, write_frame, Duplex};
use crate::handshake::{Config, HandshakeState, Pattern};
use crate::identity::{Identity, PeerId};
use crate::keypair::{Key, KeyPair, KEY_SIZE};
use crate::payload::{signed_payload, verify_payload, NoiseExtensions};
use crate::state::CipherState;

/// Everything a finished handshake hands to the transport layer.
#[derive(Debug)]
pub(crate) struct HandshakeOutcome {
    pub send: CipherState,
    pub recv: CipherState,
    pub remote_peer: PeerId,
    pub remote_static: Key,
    pub remote_extensions: Option<NoiseExtensions>,
}

/// Inputs shared by every pattern run.
pub(crate) struct HandshakeParams<'a> {
    pub local_static: &'a KeyPair,
    pub identity: &'a Identity,
    pub expected_peer: Option<&'a PeerId>,
    pub extensions: Option<NoiseExtensions>,
    pub prologue: &'a [u8],
}

impl HandshakeParams<'_> {
    fn local_payload(&self) -> Vec<u8> {
        signed_payload(
            self.identity,
            &self.local_static.public,
            self.extensions.clone(),
        )
    }
}

/// Result of an IK attempt on the initiator side.
pub(crate) enum IkInitiatorOutcome {
    /// IK completed; the channel is up.
    Complete(Box<HandshakeOutcome>),
    /// The responder's reply could not be processed under IK. Carries the
    /// raw reply frame and the ephemeral already on the wire so the
    /// selector can continue via XXfallback.
    Fallback {
        error: Error,
        initial_msg: Vec<u8>,
        ephemeral: KeyPair,
    },
    /// Unrecoverable failure (I/O, our own write).
    Failed(Error),
}

fn phase_name(pattern: Pattern, idx: usize) -> &'static str {
    match (pattern, idx) {
        (Pattern::XX, 0) | (Pattern::IK, 0) => "propose",
        (Pattern::XX, 1) | (Pattern::IK, 1) | (Pattern::XXfallback, 0) => "exchange",
        _ => "finish",
    }
}

/// Walks the remaining schedule of `hs`, writing and reading frames in
/// order. `first_inbound` replaces the first frame read, letting fallback
/// reprocess bytes already consumed from the wire.
async fn drive<T: Duplex>(
    io: &mut T,
    hs: &mut HandshakeState,
    params: &HandshakeParams<'_>,
    mut first_inbound: Option<Vec<u8>>,
) -> Result<HandshakeOutcome, Error> {
    let pattern = hs.pattern();
    let initiator = hs.is_initiator();
    let count = pattern.message_count();

    let our_last = (0..count)
        .filter(|&i| pattern.initiator_sends(i) == initiator)
        .next_back();
    let peer_last = (0..count)
        .filter(|&i| pattern.initiator_sends(i) != initiator)
        .next_back();

    let local_payload = params.local_payload();
    let mut remote_peer = None;
    let mut remote_extensions = None;

    for idx in 0..count {
        let phase = phase_name(pattern, idx);
        if pattern.initiator_sends(idx) == initiator {
            let payload: &[u8] = if Some(idx) == our_last {
                &local_payload
            } else {
                &[]
            };
            let msg = hs.write_message(payload)?;
            write_frame(io, &msg).await?;
            debug!(?pattern, phase, len = msg.len(), "sent handshake frame");
        } else {
            let frame = match first_inbound.take() {
                Some(frame) => frame,
                None => read_frame(io).await?,
            };
            let payload = hs.read_message(&frame)?;
            debug!(?pattern, phase, len = frame.len(), "consumed handshake frame");

            if Some(idx) == peer_last {
                let rs = *hs
                    .remote_static()
                    .ok_or(Error::ProtocolViolation("peer static key not received"))?;
                let (peer, ext) = verify_payload(&payload, &rs, params.expected_peer)?;
                remote_peer = Some(peer);
                remote_extensions = ext;
            }
        }
    }

    let (send, recv) = hs.split()?;
    let remote_peer =
        remote_peer.ok_or(Error::ProtocolViolation("peer sent no identity payload"))?;
    let remote_static = *hs
        .remote_static()
        .ok_or(Error::ProtocolViolation("peer static key not received"))?;

    debug!(?pattern, peer = %remote_peer.short_hex(), "handshake finished");

    Ok(HandshakeOutcome {
        send,
        recv,
        remote_peer,
        remote_static,
        remote_extensions,
    })
}

/// Full XX run for either role. A responder that already pulled the first
/// frame off the wire passes it as `first_inbound`.
pub(crate) async fn run_xx<T: Duplex>(
    io: &mut T,
    params: &HandshakeParams<'_>,
    initiator: bool,
    first_inbound: Option<Vec<u8>>,
) -> Result<HandshakeOutcome, Error> {
    let mut hs = HandshakeState::new(Config {
        pattern: Pattern::XX,
        initiator,
        local_static: params.local_static.clone(),
        remote_static: None,
        local_ephemeral: None,
        remote_ephemeral: None,
        prologue: params.prologue.to_vec(),
    })?;

    drive(io, &mut hs, params, first_inbound).await
}

/// IK attempt from the initiator. Never returns a bare fallback-worthy
/// error; the selector consumes the outcome.
pub(crate) async fn run_ik_initiator<T: Duplex>(
    io: &mut T,
    params: &HandshakeParams<'_>,
    remote_static: Key,
) -> IkInitiatorOutcome {
    let mut hs = match HandshakeState::new(Config {
        pattern: Pattern::IK,
        initiator: true,
        local_static: params.local_static.clone(),
        remote_static: Some(remote_static),
        local_ephemeral: None,
        remote_ephemeral: None,
        prologue: params.prologue.to_vec(),
    }) {
        Ok(hs) => hs,
        Err(e) => return IkInitiatorOutcome::Failed(e),
    };

    // propose: -> e, es, s, ss plus our payload.
    let msg1 = match hs.write_message(&params.local_payload()) {
        Ok(msg) => msg,
        Err(e) => return IkInitiatorOutcome::Failed(e),
    };
    if let Err(e) = write_frame(io, &msg1).await {
        return IkInitiatorOutcome::Failed(e);
    }
    debug!(pattern = ?Pattern::IK, phase = "propose", len = msg1.len(), "sent handshake frame");

    // exchange: <- e, ee, se plus the responder payload. A reply we cannot
    // process under IK is the fallback signal; losing the duplex is not.
    let frame = match read_frame(io).await {
        Ok(frame) => frame,
        Err(e) => return IkInitiatorOutcome::Failed(e),
    };

    let ephemeral = match hs.local_ephemeral() {
        Some(kp) => kp.clone(),
        None => return IkInitiatorOutcome::Failed(Error::ProtocolViolation("no ephemeral written")),
    };

    let payload = match hs.read_message(&frame) {
        Ok(payload) => payload,
        Err(error) if error.is_fallback_trigger() => {
            debug!("IK reply unreadable, preparing XXfallback");
            return IkInitiatorOutcome::Fallback {
                error,
                initial_msg: frame,
                ephemeral,
            };
        }
        Err(e) => return IkInitiatorOutcome::Failed(e),
    };

    // finish: verify the responder's identity against its pre-known static.
    let finish = (|| {
        let (peer, ext) = verify_payload(&payload, &remote_static, params.expected_peer)?;
        let (send, recv) = hs.split()?;
        Ok::<_, Error>(HandshakeOutcome {
            send,
            recv,
            remote_peer: peer,
            remote_static,
            remote_extensions: ext,
        })
    })();

    match finish {
        Ok(outcome) => {
            debug!(pattern = ?Pattern::IK, peer = %outcome.remote_peer.short_hex(), "handshake finished");
            IkInitiatorOutcome::Complete(Box::new(outcome))
        }
        Err(e) => IkInitiatorOutcome::Failed(e),
    }
}

/// IK attempt from the responder, fed the first frame already read off the
/// wire (the selector keeps the raw bytes for fallback).
pub(crate) async fn run_ik_responder<T: Duplex>(
    io: &mut T,
    params: &HandshakeParams<'_>,
    first_frame: &[u8],
) -> Result<HandshakeOutcome, Error> {
    let mut hs = HandshakeState::new(Config {
        pattern: Pattern::IK,
        initiator: false,
        local_static: params.local_static.clone(),
        remote_static: None,
        local_ephemeral: None,
        remote_ephemeral: None,
        prologue: params.prologue.to_vec(),
    })?;

    drive(io, &mut hs, params, Some(first_frame.to_vec())).await
}

/// XXfallback from the initiator after a failed IK attempt: reuses the
/// ephemeral already sent and reprocesses the responder's reply frame.
pub(crate) async fn run_xxfallback_initiator<T: Duplex>(
    io: &mut T,
    params: &HandshakeParams<'_>,
    ephemeral: KeyPair,
    initial_msg: Vec<u8>,
) -> Result<HandshakeOutcome, Error> {
    let mut hs = HandshakeState::new(Config {
        pattern: Pattern::XXfallback,
        initiator: true,
        local_static: params.local_static.clone(),
        remote_static: None,
        local_ephemeral: Some(ephemeral),
        remote_ephemeral: None,
        prologue: params.prologue.to_vec(),
    })?;

    drive(io, &mut hs, params, Some(initial_msg)).await
}

/// XXfallback from the responder after an unreadable IK first message:
/// the initiator's ephemeral is the first 32 bytes of that raw frame.
pub(crate) async fn run_xxfallback_responder<T: Duplex>(
    io: &mut T,
    params: &HandshakeParams<'_>,
    initial_msg: &[u8],
) -> Result<HandshakeOutcome, Error> {
    let ephemeral_bytes = initial_msg
        .get(..KEY_SIZE)
        .ok_or(Error::MalformedMessage("first frame shorter than a key"))?;
    let remote_ephemeral = Key::from_slice(ephemeral_bytes).expect("32-byte slice");

    let mut hs = HandshakeState::new(Config {
        pattern: Pattern::XXfallback,
        initiator: false,
        local_static: params.local_static.clone(),
        remote_static: None,
        local_ephemeral: None,
        remote_ephemeral: Some(remote_ephemeral),
        prologue: params.prologue.to_vec(),
    })?;

    drive(io, &mut hs, params, None).await
}
