//! Secure channel façade.
//!
//! Wires pattern selection, the handshake drivers, the static-key cache,
//! and metrics into the two entry points `secure_outbound` and
//! `secure_inbound`.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::cache::{MemoryKeyCache, StaticKeyCache};
use crate::driver::{
    run_ik_initiator, run_ik_responder, run_xx, run_xxfallback_initiator,
    run_xxfallback_responder, HandshakeOutcome, HandshakeParams, IkInitiatorOutcome,
};
use crate::error::Error;
use crate::framing::{read_frame, Duplex};
use crate::identity::{Identity, PeerId};
use crate::keypair::{Key, KeyPair, KEY_SIZE};
use crate::metrics::NoiseMetrics;
use crate::payload::NoiseExtensions;
use crate::stream::SecureStream;
use crate::PROTOCOL_ID;

/// Options for building a [`Noise`] channel.
pub struct NoiseConfig {
    /// Noise static private key; generated when absent. The public half is
    /// always re-derived from the scalar.
    pub static_key: Option<Key>,
    /// Extensions advertised in the handshake payload.
    pub extensions: Option<NoiseExtensions>,
    /// Enable the IK-first optimization with XXfallback recovery.
    pub use_noise_pipes: bool,
    /// Counter sink shared with the rest of the process.
    pub metrics: Option<Arc<NoiseMetrics>>,
    /// Static-key memory; in-process map when absent.
    pub cache: Option<Arc<dyn StaticKeyCache>>,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            static_key: None,
            extensions: None,
            use_noise_pipes: true,
            metrics: None,
            cache: None,
        }
    }
}

/// A secured duplex plus the authenticated remote identity.
pub struct SecuredConnection<T> {
    /// The encrypted, framed stream.
    pub conn: SecureStream<T>,
    /// Identity proven during the handshake.
    pub remote_peer: PeerId,
    /// Extensions the peer advertised, if any.
    pub remote_extensions: Option<NoiseExtensions>,
}

/// The secure-channel entry point.
pub struct Noise {
    static_keypair: KeyPair,
    extensions: Option<NoiseExtensions>,
    use_noise_pipes: bool,
    metrics: Option<Arc<NoiseMetrics>>,
    cache: Arc<dyn StaticKeyCache>,
}

impl std::fmt::Debug for Noise {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Noise")
            .field("static_keypair", &self.static_keypair)
            .field("extensions", &self.extensions)
            .field("use_noise_pipes", &self.use_noise_pipes)
            .finish_non_exhaustive()
    }
}

impl Noise {
    /// Protocol identifier, for transport-level negotiation.
    pub const PROTOCOL: &'static str = PROTOCOL_ID;

    /// Builds a channel from the given options.
    pub fn new(config: NoiseConfig) -> Result<Self, Error> {
        let static_keypair = match config.static_key {
            Some(private) => KeyPair::from_private(private)
                .map_err(|_| Error::ProtocolViolation("invalid static private scalar"))?,
            None => KeyPair::generate(),
        };

        Ok(Self {
            static_keypair,
            extensions: config.extensions,
            use_noise_pipes: config.use_noise_pipes,
            metrics: config.metrics,
            cache: config
                .cache
                .unwrap_or_else(|| Arc::new(MemoryKeyCache::new())),
        })
    }

    /// This channel's Noise static public key, for out-of-band priming of
    /// peer caches.
    pub fn static_public_key(&self) -> &Key {
        &self.static_keypair.public
    }

    /// Secures an outbound duplex against a known remote identity.
    pub async fn secure_outbound<T: Duplex>(
        &self,
        local: &Identity,
        mut io: T,
        remote: PeerId,
    ) -> Result<SecuredConnection<T>, Error> {
        let params = HandshakeParams {
            local_static: &self.static_keypair,
            identity: local,
            expected_peer: Some(&remote),
            extensions: self.extensions.clone(),
            prologue: PROTOCOL_ID.as_bytes(),
        };

        let result = self.outbound_handshake(&mut io, &params, &remote).await;
        self.finish(io, result)
    }

    /// Secures an inbound duplex, optionally pinning the expected identity.
    pub async fn secure_inbound<T: Duplex>(
        &self,
        local: &Identity,
        mut io: T,
        remote: Option<PeerId>,
    ) -> Result<SecuredConnection<T>, Error> {
        let params = HandshakeParams {
            local_static: &self.static_keypair,
            identity: local,
            expected_peer: remote.as_ref(),
            extensions: self.extensions.clone(),
            prologue: PROTOCOL_ID.as_bytes(),
        };

        let result = self.inbound_handshake(&mut io, &params).await;
        self.finish(io, result)
    }

    /// Looks up the remote static key for an IK attempt.
    fn cached_static(&self, remote: &PeerId) -> Result<Key, Error> {
        self.cache.get(remote).ok_or(Error::CacheMiss)
    }

    /// Initiator-side selection: IK on cache hit, XX otherwise, one
    /// XXfallback recovery after a failed IK exchange.
    async fn outbound_handshake<T: Duplex>(
        &self,
        io: &mut T,
        params: &HandshakeParams<'_>,
        remote: &PeerId,
    ) -> Result<HandshakeOutcome, Error> {
        if self.use_noise_pipes {
            match self.cached_static(remote) {
                Ok(remote_static) => {
                    debug!(peer = %remote.short_hex(), "cached static key, proposing IK");
                    match run_ik_initiator(io, params, remote_static).await {
                        IkInitiatorOutcome::Complete(outcome) => return Ok(*outcome),
                        IkInitiatorOutcome::Fallback {
                            error,
                            initial_msg,
                            ephemeral,
                        } => {
                            debug!(%error, "IK exchange failed, continuing as XXfallback");
                            let outcome =
                                run_xxfallback_initiator(io, params, ephemeral, initial_msg)
                                    .await?;
                            self.remember_peer(&outcome);
                            return Ok(outcome);
                        }
                        IkInitiatorOutcome::Failed(e) => return Err(e),
                    }
                }
                Err(Error::CacheMiss) => {
                    debug!(peer = %remote.short_hex(), "no cached static key, proposing XX");
                }
                Err(e) => return Err(e),
            }
        }

        let outcome = run_xx(io, params, true, None).await?;
        self.remember_peer(&outcome);
        Ok(outcome)
    }

    /// Responder-side selection: with pipes, try IK on the first frame and
    /// recover via XXfallback when it is unreadable.
    async fn inbound_handshake<T: Duplex>(
        &self,
        io: &mut T,
        params: &HandshakeParams<'_>,
    ) -> Result<HandshakeOutcome, Error> {
        if !self.use_noise_pipes {
            let outcome = run_xx(io, params, false, None).await?;
            self.remember_peer(&outcome);
            return Ok(outcome);
        }

        let first = read_frame(io).await?;
        match run_ik_responder(io, params, &first).await {
            Ok(outcome) => Ok(outcome),
            Err(error) if error.is_fallback_trigger() => {
                // A bare 32-byte ephemeral cannot be an IK proposal; it is
                // an XX opening from an initiator without a cached key.
                if first.len() == KEY_SIZE {
                    debug!("first frame is a bare ephemeral, continuing as XX");
                    let outcome = run_xx(io, params, false, Some(first)).await?;
                    self.remember_peer(&outcome);
                    return Ok(outcome);
                }
                debug!(%error, "IK proposal unreadable, continuing as XXfallback");
                let outcome = run_xxfallback_responder(io, params, &first).await?;
                self.remember_peer(&outcome);
                Ok(outcome)
            }
            Err(e) => Err(e),
        }
    }

    /// Records the authenticated static key for future IK attempts.
    /// Only XX-family completions write here; IK already had the key.
    fn remember_peer(&self, outcome: &HandshakeOutcome) {
        if self.use_noise_pipes {
            self.cache
                .put(outcome.remote_peer, outcome.remote_static);
        }
    }

    /// Counts the result and wraps a success into the secured stream.
    fn finish<T: Duplex>(
        &self,
        io: T,
        result: Result<HandshakeOutcome, Error>,
    ) -> Result<SecuredConnection<T>, Error> {
        match result {
            Ok(outcome) => {
                if let Some(m) = &self.metrics {
                    m.record_handshake_success();
                }
                Ok(SecuredConnection {
                    conn: SecureStream::new(io, outcome.send, outcome.recv, self.metrics.clone()),
                    remote_peer: outcome.remote_peer,
                    remote_extensions: outcome.remote_extensions,
                })
            }
            Err(e) => {
                if let Some(m) = &self.metrics {
                    m.record_handshake_error();
                }
                warn!(error = %e, "handshake failed");
                Err(e)
            }
        }
    }
}
