//! Noise handshake patterns (XX, IK, XXfallback).

use tracing::trace;

use crate::cipher::{Hash, TAG_SIZE};
use crate::error::Error;
use crate::keypair::{Key, KeyPair, KEY_SIZE};
use crate::state::{CipherState, SymmetricState};

/// Handshake pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    /// Mutual authentication, no prior knowledge.
    /// -> e
    /// <- e, ee, s, es
    /// -> s, se
    XX,
    /// Initiator knows the responder's static key.
    /// <- s (pre-message)
    /// -> e, es, s, ss
    /// <- e, ee, se
    IK,
    /// Recovery after a failed IK message: the initiator's ephemeral is
    /// treated as already transmitted.
    /// -> e (pre-message)
    /// <- e, ee, s, es
    /// -> s, se
    XXfallback,
}

impl Pattern {
    /// Full Noise protocol name for this pattern.
    pub fn protocol_name(&self) -> &'static str {
        match self {
            Pattern::XX => "Noise_XX_25519_ChaChaPoly_SHA256",
            Pattern::IK => "Noise_IK_25519_ChaChaPoly_SHA256",
            Pattern::XXfallback => "Noise_XXfallback_25519_ChaChaPoly_SHA256",
        }
    }

    fn message_patterns(&self) -> &'static [&'static [Token]] {
        match self {
            Pattern::XX => &[
                &[Token::E],
                &[Token::E, Token::EE, Token::S, Token::ES],
                &[Token::S, Token::SE],
            ],
            Pattern::IK => &[
                &[Token::E, Token::ES, Token::S, Token::SS],
                &[Token::E, Token::EE, Token::SE],
            ],
            Pattern::XXfallback => &[
                &[Token::E, Token::EE, Token::S, Token::ES],
                &[Token::S, Token::SE],
            ],
        }
    }

    /// True for patterns whose first wire message comes from the responder.
    fn responder_opens(&self) -> bool {
        matches!(self, Pattern::XXfallback)
    }

    /// True if the initiator writes the message at `idx`.
    pub(crate) fn initiator_sends(&self, idx: usize) -> bool {
        if self.responder_opens() {
            idx % 2 == 1
        } else {
            idx % 2 == 0
        }
    }

    /// Number of wire messages in the schedule.
    pub fn message_count(&self) -> usize {
        self.message_patterns().len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token {
    E,  // ephemeral
    S,  // static, encrypted once a key is present
    EE, // DH(e, re)
    ES, // DH(e, rs) / DH(s, re)
    SE, // DH(s, re) / DH(e, rs)
    SS, // DH(s, rs)
}

/// Handshake configuration.
pub struct Config {
    /// Pattern to run.
    pub pattern: Pattern,
    /// True if this side initiated the channel.
    pub initiator: bool,
    /// Local Noise static key pair.
    pub local_static: KeyPair,
    /// Remote static public key (IK initiator pre-message).
    pub remote_static: Option<Key>,
    /// Ephemeral to reuse (XXfallback initiator pre-message).
    pub local_ephemeral: Option<KeyPair>,
    /// Remote ephemeral already received (XXfallback responder pre-message).
    pub remote_ephemeral: Option<Key>,
    /// Prologue mixed into the hash before any message.
    pub prologue: Vec<u8>,
}

/// Drives one Noise pattern over an ordered token schedule.
#[derive(Debug)]
pub struct HandshakeState {
    pattern: Pattern,
    initiator: bool,
    ss: SymmetricState,
    local_static: KeyPair,
    local_ephemeral: Option<KeyPair>,
    remote_static: Option<Key>,
    remote_ephemeral: Option<Key>,
    msg_index: usize,
    finished: bool,
}

impl HandshakeState {
    /// Initializes the symmetric state, mixes the prologue, and processes
    /// the pattern's pre-messages.
    pub fn new(config: Config) -> Result<Self, Error> {
        let pattern = config.pattern;
        let mut ss = SymmetricState::new(pattern.protocol_name());
        ss.mix_hash(&config.prologue);

        let mut remote_static = None;
        let mut remote_ephemeral = None;
        let mut local_ephemeral = None;

        match pattern {
            Pattern::XX => {}
            Pattern::IK => {
                // Responder's static key is pre-shared knowledge.
                if config.initiator {
                    let rs = config
                        .remote_static
                        .ok_or(Error::ProtocolViolation("IK initiator requires remote static"))?;
                    ss.mix_hash(rs.as_bytes());
                    remote_static = Some(rs);
                } else {
                    ss.mix_hash(config.local_static.public.as_bytes());
                }
            }
            Pattern::XXfallback => {
                // The initiator's ephemeral from the failed IK message is
                // treated as already transmitted.
                if config.initiator {
                    let le = config.local_ephemeral.ok_or(Error::ProtocolViolation(
                        "XXfallback initiator requires its prior ephemeral",
                    ))?;
                    ss.mix_hash(le.public.as_bytes());
                    local_ephemeral = Some(le);
                } else {
                    let re = config.remote_ephemeral.ok_or(Error::ProtocolViolation(
                        "XXfallback responder requires the remote ephemeral",
                    ))?;
                    ss.mix_hash(re.as_bytes());
                    remote_ephemeral = Some(re);
                }
            }
        }

        Ok(Self {
            pattern,
            initiator: config.initiator,
            ss,
            local_static: config.local_static,
            local_ephemeral,
            remote_static,
            remote_ephemeral,
            msg_index: 0,
            finished: false,
        })
    }

    /// True if the local side writes the message at the current index.
    fn our_turn_to_write(&self) -> bool {
        self.pattern.initiator_sends(self.msg_index) == self.initiator
    }

    /// Produces the next handshake message with `payload` appended after
    /// the tokens, encrypted when a key is present.
    pub fn write_message(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        if self.finished {
            return Err(Error::ProtocolViolation("handshake already finished"));
        }
        if !self.our_turn_to_write() {
            return Err(Error::ProtocolViolation("not our turn to write"));
        }

        let tokens = self.pattern.message_patterns()[self.msg_index];
        let mut msg = Vec::new();

        for token in tokens {
            match token {
                Token::E => {
                    let ephemeral = KeyPair::generate();
                    msg.extend_from_slice(ephemeral.public.as_bytes());
                    self.ss.mix_hash(ephemeral.public.as_bytes());
                    self.local_ephemeral = Some(ephemeral);
                }
                Token::S => {
                    let encrypted = self
                        .ss
                        .encrypt_and_hash(self.local_static.public.as_bytes())?;
                    msg.extend_from_slice(&encrypted);
                }
                _ => self.mix_dh(*token)?,
            }
        }

        let encrypted = self.ss.encrypt_and_hash(payload)?;
        msg.extend_from_slice(&encrypted);

        trace!(
            pattern = ?self.pattern,
            index = self.msg_index,
            len = msg.len(),
            "wrote handshake message"
        );

        self.advance();
        Ok(msg)
    }

    /// Consumes a received handshake message and returns its payload.
    pub fn read_message(&mut self, msg: &[u8]) -> Result<Vec<u8>, Error> {
        if self.finished {
            return Err(Error::ProtocolViolation("handshake already finished"));
        }
        if self.our_turn_to_write() {
            return Err(Error::ProtocolViolation("not our turn to read"));
        }

        let tokens = self.pattern.message_patterns()[self.msg_index];
        let mut offset = 0;

        for token in tokens {
            match token {
                Token::E => {
                    let end = offset + KEY_SIZE;
                    let bytes = msg
                        .get(offset..end)
                        .ok_or(Error::MalformedMessage("truncated ephemeral"))?;
                    let re = Key::from_slice(bytes).expect("32-byte slice");
                    self.ss.mix_hash(re.as_bytes());
                    self.remote_ephemeral = Some(re);
                    offset = end;
                }
                Token::S => {
                    let len = if self.ss.has_key() {
                        KEY_SIZE + TAG_SIZE
                    } else {
                        KEY_SIZE
                    };
                    let end = offset + len;
                    let bytes = msg
                        .get(offset..end)
                        .ok_or(Error::MalformedMessage("truncated static key"))?;
                    let decrypted = self.ss.decrypt_and_hash(bytes)?;
                    let rs = Key::from_slice(&decrypted)
                        .ok_or(Error::MalformedMessage("bad static key length"))?;
                    self.remote_static = Some(rs);
                    offset = end;
                }
                _ => self.mix_dh(*token)?,
            }
        }

        let payload = self.ss.decrypt_and_hash(&msg[offset..])?;

        trace!(
            pattern = ?self.pattern,
            index = self.msg_index,
            payload_len = payload.len(),
            "read handshake message"
        );

        self.advance();
        Ok(payload)
    }

    /// Performs the DH for a mixing token and feeds it into the chaining key.
    fn mix_dh(&mut self, token: Token) -> Result<(), Error> {
        let le = self
            .local_ephemeral
            .as_ref()
            .ok_or(Error::ProtocolViolation("missing local ephemeral"));
        let re = self
            .remote_ephemeral
            .as_ref()
            .ok_or(Error::ProtocolViolation("missing remote ephemeral"));
        let rs = self
            .remote_static
            .as_ref()
            .ok_or(Error::ProtocolViolation("missing remote static"));

        let shared = match (token, self.initiator) {
            (Token::EE, _) => le?.dh(re?),
            (Token::ES, true) => le?.dh(rs?),
            (Token::ES, false) => self.local_static.dh(re?),
            (Token::SE, true) => self.local_static.dh(re?),
            (Token::SE, false) => le?.dh(rs?),
            (Token::SS, _) => self.local_static.dh(rs?),
            (Token::E | Token::S, _) => {
                return Err(Error::ProtocolViolation("non-DH token"));
            }
        }
        .map_err(|_| Error::ProtocolViolation("degenerate DH result"))?;

        self.ss.mix_key(shared.as_bytes());
        Ok(())
    }

    fn advance(&mut self) {
        self.msg_index += 1;
        if self.msg_index >= self.pattern.message_count() {
            self.finished = true;
        }
    }

    /// True once every message in the schedule has been processed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// The pattern this state machine is running.
    pub fn pattern(&self) -> Pattern {
        self.pattern
    }

    /// True if this side initiated the channel.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Finalizes into `(send, recv)` CipherStates for this side's role.
    pub fn split(&self) -> Result<(CipherState, CipherState), Error> {
        if !self.finished {
            return Err(Error::ProtocolViolation("split before handshake finished"));
        }

        let (cs1, cs2) = self.ss.split();
        if self.initiator {
            Ok((cs1, cs2))
        } else {
            Ok((cs2, cs1))
        }
    }

    /// Remote static public key, once received or pre-shared.
    pub fn remote_static(&self) -> Option<&Key> {
        self.remote_static.as_ref()
    }

    /// Local ephemeral key pair, once generated or seeded.
    pub(crate) fn local_ephemeral(&self) -> Option<&KeyPair> {
        self.local_ephemeral.as_ref()
    }

    /// Running handshake hash.
    pub fn hash(&self) -> &Hash {
        self.ss.hash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(pattern: Pattern) -> (HandshakeState, HandshakeState, KeyPair, KeyPair) {
        let init_static = KeyPair::generate();
        let resp_static = KeyPair::generate();

        let initiator = HandshakeState::new(Config {
            pattern,
            initiator: true,
            local_static: init_static.clone(),
            remote_static: (pattern == Pattern::IK).then(|| resp_static.public),
            local_ephemeral: None,
            remote_ephemeral: None,
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        let responder = HandshakeState::new(Config {
            pattern,
            initiator: false,
            local_static: resp_static.clone(),
            remote_static: None,
            local_ephemeral: None,
            remote_ephemeral: None,
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        (initiator, responder, init_static, resp_static)
    }

    fn assert_transport_works(init: &HandshakeState, resp: &HandshakeState) {
        let (mut i_send, mut i_recv) = init.split().unwrap();
        let (mut r_send, mut r_recv) = resp.split().unwrap();

        let ct = i_send.encrypt_with_ad(&[], b"from initiator").unwrap();
        assert_eq!(r_recv.decrypt_with_ad(&[], &ct).unwrap(), b"from initiator");

        let ct = r_send.encrypt_with_ad(&[], b"from responder").unwrap();
        assert_eq!(i_recv.decrypt_with_ad(&[], &ct).unwrap(), b"from responder");
    }

    #[test]
    fn xx_three_messages() {
        let (mut init, mut resp, init_static, resp_static) = pair(Pattern::XX);

        let msg1 = init.write_message(&[]).unwrap();
        assert_eq!(msg1.len(), KEY_SIZE); // e + empty keyless payload
        resp.read_message(&msg1).unwrap();

        let msg2 = resp.write_message(b"resp payload").unwrap();
        let p2 = init.read_message(&msg2).unwrap();
        assert_eq!(p2, b"resp payload");
        assert_eq!(init.remote_static(), Some(&resp_static.public));

        let msg3 = init.write_message(b"init payload").unwrap();
        let p3 = resp.read_message(&msg3).unwrap();
        assert_eq!(p3, b"init payload");
        assert_eq!(resp.remote_static(), Some(&init_static.public));

        assert!(init.is_finished());
        assert!(resp.is_finished());
        assert_eq!(init.hash(), resp.hash());
        assert_transport_works(&init, &resp);
    }

    #[test]
    fn ik_two_messages() {
        let (mut init, mut resp, init_static, _) = pair(Pattern::IK);

        let msg1 = init.write_message(b"hello").unwrap();
        let p1 = resp.read_message(&msg1).unwrap();
        assert_eq!(p1, b"hello");
        assert_eq!(resp.remote_static(), Some(&init_static.public));

        let msg2 = resp.write_message(b"welcome").unwrap();
        let p2 = init.read_message(&msg2).unwrap();
        assert_eq!(p2, b"welcome");

        assert!(init.is_finished());
        assert!(resp.is_finished());
        assert_eq!(init.hash(), resp.hash());
        assert_transport_works(&init, &resp);
    }

    #[test]
    fn xxfallback_reuses_initiator_ephemeral() {
        let init_static = KeyPair::generate();
        let resp_static = KeyPair::generate();

        // The ephemeral the initiator already put on the wire in a failed
        // IK attempt.
        let stale_ephemeral = KeyPair::generate();

        let mut init = HandshakeState::new(Config {
            pattern: Pattern::XXfallback,
            initiator: true,
            local_static: init_static.clone(),
            remote_static: None,
            local_ephemeral: Some(stale_ephemeral.clone()),
            remote_ephemeral: None,
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        let mut resp = HandshakeState::new(Config {
            pattern: Pattern::XXfallback,
            initiator: false,
            local_static: resp_static.clone(),
            remote_static: None,
            local_ephemeral: None,
            remote_ephemeral: Some(stale_ephemeral.public),
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        // The responder opens.
        let msg1 = resp.write_message(b"resp payload").unwrap();
        let p1 = init.read_message(&msg1).unwrap();
        assert_eq!(p1, b"resp payload");
        assert_eq!(init.remote_static(), Some(&resp_static.public));

        let msg2 = init.write_message(b"init payload").unwrap();
        let p2 = resp.read_message(&msg2).unwrap();
        assert_eq!(p2, b"init payload");
        assert_eq!(resp.remote_static(), Some(&init_static.public));

        assert!(init.is_finished());
        assert_eq!(init.hash(), resp.hash());
        assert_transport_works(&init, &resp);
    }

    #[test]
    fn ik_initiator_requires_remote_static() {
        let err = HandshakeState::new(Config {
            pattern: Pattern::IK,
            initiator: true,
            local_static: KeyPair::generate(),
            remote_static: None,
            local_ephemeral: None,
            remote_ephemeral: None,
            prologue: Vec::new(),
        })
        .unwrap_err();
        assert!(matches!(err, Error::ProtocolViolation(_)));
    }

    #[test]
    fn wrong_turn_is_rejected() {
        let (mut init, mut resp, _, _) = pair(Pattern::XX);

        assert!(matches!(
            resp.write_message(&[]),
            Err(Error::ProtocolViolation(_))
        ));
        assert!(matches!(
            init.read_message(&[0u8; 32]),
            Err(Error::ProtocolViolation(_))
        ));
    }

    #[test]
    fn split_before_finish_is_rejected() {
        let (init, _, _, _) = pair(Pattern::XX);
        assert!(init.split().is_err());
    }

    #[test]
    fn tampered_message_fails_decrypt() {
        let (mut init, mut resp, _, _) = pair(Pattern::XX);

        let msg1 = init.write_message(&[]).unwrap();
        resp.read_message(&msg1).unwrap();

        let mut msg2 = resp.write_message(&[]).unwrap();
        let last = msg2.len() - 1;
        msg2[last] ^= 0x01;
        assert!(matches!(init.read_message(&msg2), Err(Error::Decrypt)));
    }

    #[test]
    fn truncated_message_is_malformed() {
        let (mut init, mut resp, _, _) = pair(Pattern::XX);

        let msg1 = init.write_message(&[]).unwrap();
        assert!(matches!(
            resp.read_message(&msg1[..16]),
            Err(Error::MalformedMessage(_))
        ));
    }

    #[test]
    fn ik_message_one_rejected_by_wrong_static() {
        // Initiator primed with a key that is not the responder's.
        let init_static = KeyPair::generate();
        let resp_static = KeyPair::generate();
        let wrong = KeyPair::generate();

        let mut init = HandshakeState::new(Config {
            pattern: Pattern::IK,
            initiator: true,
            local_static: init_static,
            remote_static: Some(wrong.public),
            local_ephemeral: None,
            remote_ephemeral: None,
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        let mut resp = HandshakeState::new(Config {
            pattern: Pattern::IK,
            initiator: false,
            local_static: resp_static,
            remote_static: None,
            local_ephemeral: None,
            remote_ephemeral: None,
            prologue: b"/noise".to_vec(),
        })
        .unwrap();

        let msg1 = init.write_message(&[]).unwrap();
        assert!(matches!(resp.read_message(&msg1), Err(Error::Decrypt)));
    }
}
