//! Modular-exponentiation key exchange run once per connection.
//!
//! The exchange happens before any framed traffic:
//!
//! ```text
//! server -> client   i64 generator g
//! server -> client   i32 len, len bytes   A = g^a mod P
//! client -> server   i32 len, len bytes   B = g^b mod P
//! ```
//!
//! Big integers travel as big-endian two's-complement bytes. Both sides end
//! up with `g^(ab) mod P`, which must fit a signed 64-bit value; a secret that
//! does not fit fails the exchange before `B` is sent.

use std::time::Duration;

use num_bigint::BigInt;
use num_traits::{One, ToPrimitive};
use rand::Rng;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{DecodeError, HandshakeError};

/// Largest big-integer encoding accepted from the peer.
const MAX_PUBLIC_VALUE_LEN: i32 = 4096;

/// Parameters of the key exchange.
#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    /// Public prime modulus. Default: the Mersenne prime 2^61 - 1.
    pub prime: BigInt,
    /// Inclusive lower bound of the private exponent. Default: 10000.
    pub min_exponent: u64,
    /// Give up on the exchange after this long. Default: no limit.
    pub timeout: Option<Duration>,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            prime: BigInt::from((1i64 << 61) - 1),
            min_exponent: 10_000,
            timeout: None,
        }
    }
}

impl HandshakeConfig {
    /// Build a config from a decimal prime string.
    pub fn from_decimal(
        prime: &str,
        min_exponent: u64,
        timeout: Option<Duration>,
    ) -> Result<Self, HandshakeError> {
        let prime: BigInt = prime
            .trim()
            .parse()
            .map_err(|_| HandshakeError::InvalidPrime(prime.to_string()))?;
        let config = Self {
            prime,
            min_exponent,
            timeout,
        };
        config.exponent_range()?;
        Ok(config)
    }

    /// Half-open range the private exponent is sampled from.
    fn exponent_range(&self) -> Result<std::ops::Range<u64>, HandshakeError> {
        if self.prime <= BigInt::one() {
            return Err(HandshakeError::InvalidPrime(self.prime.to_string()));
        }
        let upper = self.prime.to_u64().unwrap_or(u64::MAX);
        if self.min_exponent >= upper {
            return Err(HandshakeError::InvalidPrime(format!(
                "{} leaves no exponents above {}",
                self.prime, self.min_exponent
            )));
        }
        Ok(self.min_exponent..upper)
    }
}

/// Progress of a [`KeyExchange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    /// Not started.
    Idle,
    /// Waiting for the peer's generator and public value.
    AwaitingPeerPublicValue,
    /// Both public values known, deriving the secret.
    ComputingSharedSecret,
    /// Secret derived and local public value sent.
    Established,
    /// Terminal failure; the connection must be closed.
    Failed,
}

/// Per-connection secret negotiated by the key exchange.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SharedSecret(i64);

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

impl SharedSecret {
    /// Wrap a raw secret value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The raw secret.
    pub fn value(&self) -> i64 {
        self.0
    }

    fn apply_keystream(&self, data: &mut [u8]) {
        let mut key = [0u8; 32];
        key[..8].copy_from_slice(&self.0.to_be_bytes());
        let mut stream = blake3::Hasher::new_keyed(&key)
            .update(b"tessera string cipher")
            .finalize_xof();
        let mut pad = vec![0u8; data.len()];
        stream.fill(&mut pad);
        for (byte, k) in data.iter_mut().zip(pad) {
            *byte ^= k;
        }
    }

    /// Encrypt a UTF-8 string with a keystream derived from the secret.
    pub fn encrypt_str(&self, plain: &str) -> Vec<u8> {
        let mut bytes = plain.as_bytes().to_vec();
        self.apply_keystream(&mut bytes);
        bytes
    }

    /// Invert [`encrypt_str`](Self::encrypt_str).
    pub fn decrypt_str(&self, cipher: &[u8]) -> Result<String, DecodeError> {
        let mut bytes = cipher.to_vec();
        self.apply_keystream(&mut bytes);
        String::from_utf8(bytes)
            .map_err(|_| DecodeError::malformed("decrypted string is not UTF-8"))
    }
}

/// `base^exponent mod prime`, always in `[0, prime)`.
pub fn mod_pow(base: &BigInt, exponent: u64, prime: &BigInt) -> BigInt {
    base.modpow(&BigInt::from(exponent), prime)
}

/// Client side of the key exchange.
#[derive(Debug)]
pub struct KeyExchange {
    config: HandshakeConfig,
    private_exponent: u64,
    state: HandshakeState,
}

impl KeyExchange {
    /// Create an exchange with a freshly sampled private exponent.
    pub fn new(config: HandshakeConfig) -> Result<Self, HandshakeError> {
        let range = config.exponent_range()?;
        let private_exponent = rand::rng().random_range(range);
        Ok(Self::with_private_exponent(config, private_exponent))
    }

    /// Create an exchange with a fixed private exponent.
    pub fn with_private_exponent(config: HandshakeConfig, private_exponent: u64) -> Self {
        Self {
            config,
            private_exponent,
            state: HandshakeState::Idle,
        }
    }

    /// Current state of the exchange.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    fn transition(&mut self, next: HandshakeState) {
        tracing::debug!("Key exchange {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    /// Run the exchange over `stream`, honoring the configured timeout.
    ///
    /// Any failure leaves the exchange in [`HandshakeState::Failed`]; the
    /// caller must close the connection.
    pub async fn run<S>(&mut self, stream: &mut S) -> Result<SharedSecret, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let result = match self.config.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.exchange(stream)).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!("Key exchange timed out after {limit:?}");
                    Err(HandshakeError::TransportClosed)
                }
            },
            None => self.exchange(stream).await,
        };
        if result.is_err() {
            self.transition(HandshakeState::Failed);
        }
        result
    }

    async fn exchange<S>(&mut self, stream: &mut S) -> Result<SharedSecret, HandshakeError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.transition(HandshakeState::AwaitingPeerPublicValue);
        let generator = BigInt::from(stream.read_i64().await.map_err(eof_to_closed)?);
        let local_public = mod_pow(&generator, self.private_exponent, &self.config.prime);
        let peer_public = read_big_int(stream).await?;

        self.transition(HandshakeState::ComputingSharedSecret);
        let secret = mod_pow(&peer_public, self.private_exponent, &self.config.prime)
            .to_i64()
            .ok_or(HandshakeError::Overflow)?;

        write_big_int(stream, &local_public).await?;
        self.transition(HandshakeState::Established);
        Ok(SharedSecret(secret))
    }
}

/// Peer side of the exchange, as run by a server.
///
/// Sends `generator` and `generator^private_exponent mod P`, then reads the
/// client's public value and derives the same secret as [`KeyExchange`].
pub async fn serve_key_exchange<S>(
    stream: &mut S,
    config: &HandshakeConfig,
    generator: i64,
    private_exponent: u64,
) -> Result<SharedSecret, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let public = mod_pow(&BigInt::from(generator), private_exponent, &config.prime);
    stream.write_i64(generator).await?;
    write_big_int(stream, &public).await?;
    let client_public = read_big_int(stream).await?;
    mod_pow(&client_public, private_exponent, &config.prime)
        .to_i64()
        .map(SharedSecret)
        .ok_or(HandshakeError::Overflow)
}

async fn read_big_int<R: AsyncRead + Unpin>(reader: &mut R) -> Result<BigInt, HandshakeError> {
    let len = reader.read_i32().await.map_err(eof_to_closed)?;
    if !(0..=MAX_PUBLIC_VALUE_LEN).contains(&len) {
        return Err(HandshakeError::InvalidLength(len));
    }
    let mut bytes = vec![0u8; len as usize];
    reader.read_exact(&mut bytes).await.map_err(eof_to_closed)?;
    Ok(BigInt::from_signed_bytes_be(&bytes))
}

async fn write_big_int<W: AsyncWrite + Unpin>(
    writer: &mut W,
    value: &BigInt,
) -> Result<(), HandshakeError> {
    let bytes = value.to_signed_bytes_be();
    writer.write_i32(bytes.len() as i32).await?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

fn eof_to_closed(e: std::io::Error) -> HandshakeError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        HandshakeError::TransportClosed
    } else {
        HandshakeError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tokio::io::duplex;

    /// 2^89 - 1, large enough that most secrets overflow an i64.
    const BIG_PRIME: &str = "618970019642690137449562111";

    #[tokio::test]
    async fn test_both_sides_derive_same_secret() {
        let (mut client, mut server) = duplex(1024);
        let config = HandshakeConfig::default();

        let server_config = config.clone();
        let server_task = tokio::spawn(async move {
            serve_key_exchange(&mut server, &server_config, 5, 123_457)
                .await
                .unwrap()
        });

        let mut exchange = KeyExchange::new(config).unwrap();
        let client_secret = exchange.run(&mut client).await.unwrap();
        let server_secret = server_task.await.unwrap();

        assert_eq!(client_secret, server_secret);
        assert_eq!(exchange.state(), HandshakeState::Established);
    }

    #[tokio::test]
    async fn test_overflowing_secret_fails_without_reply() {
        let (mut client, mut server) = duplex(1024);
        let config = HandshakeConfig::from_decimal(BIG_PRIME, 10_000, None).unwrap();

        // Peer value P - 1 raised to an odd exponent is P - 1, far above i64::MAX.
        let peer_public = &config.prime - BigInt::one();
        server.write_i64(3).await.unwrap();
        let bytes = peer_public.to_signed_bytes_be();
        server.write_i32(bytes.len() as i32).await.unwrap();
        server.write_all(&bytes).await.unwrap();

        let mut exchange = KeyExchange::with_private_exponent(config, 10_001);
        let result = exchange.run(&mut client).await;
        assert!(matches!(result, Err(HandshakeError::Overflow)));
        assert_eq!(exchange.state(), HandshakeState::Failed);

        drop(client);
        assert!(
            server.read_i32().await.is_err(),
            "Client must not send its public value after an overflow"
        );
    }

    #[tokio::test]
    async fn test_peer_closing_early_is_transport_closed() {
        let (mut client, server) = duplex(1024);
        drop(server);
        let mut exchange = KeyExchange::new(HandshakeConfig::default()).unwrap();
        let result = exchange.run(&mut client).await;
        assert!(matches!(result, Err(HandshakeError::TransportClosed)));
    }

    #[tokio::test]
    async fn test_negative_length_rejected() {
        let (mut client, mut server) = duplex(1024);
        server.write_i64(2).await.unwrap();
        server.write_i32(-4).await.unwrap();
        let mut exchange = KeyExchange::new(HandshakeConfig::default()).unwrap();
        let result = exchange.run(&mut client).await;
        assert!(matches!(result, Err(HandshakeError::InvalidLength(-4))));
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_transport_closed() {
        let (mut client, _server) = duplex(1024);
        let config = HandshakeConfig {
            timeout: Some(Duration::from_millis(50)),
            ..HandshakeConfig::default()
        };
        let mut exchange = KeyExchange::new(config).unwrap();
        let result = exchange.run(&mut client).await;
        assert!(matches!(result, Err(HandshakeError::TransportClosed)));
    }

    #[test]
    fn test_prime_must_leave_room_for_exponent() {
        assert!(matches!(
            HandshakeConfig::from_decimal("9973", 10_000, None),
            Err(HandshakeError::InvalidPrime(_))
        ));
        assert!(matches!(
            HandshakeConfig::from_decimal("not a number", 10_000, None),
            Err(HandshakeError::InvalidPrime(_))
        ));
    }

    #[test]
    fn test_encrypted_string_roundtrip() {
        let secret = SharedSecret::new(0x1234_5678_9ABC);
        let cipher = secret.encrypt_str("move north");
        assert_ne!(cipher, b"move north");
        assert_eq!(secret.decrypt_str(&cipher).unwrap(), "move north");
    }

    #[test]
    fn test_different_secrets_produce_different_ciphertext() {
        let a = SharedSecret::new(1).encrypt_str("payload");
        let b = SharedSecret::new(2).encrypt_str("payload");
        assert_ne!(a, b);
    }

    proptest! {
        #[test]
        fn test_exponentiation_commutes(
            g in 2i64..1_000_000,
            a in 10_000u64..u64::MAX,
            b in 10_000u64..u64::MAX,
        ) {
            let prime = HandshakeConfig::default().prime;
            let g = BigInt::from(g);
            let ab = mod_pow(&mod_pow(&g, a, &prime), b, &prime);
            let ba = mod_pow(&mod_pow(&g, b, &prime), a, &prime);
            prop_assert_eq!(ab, ba);
        }
    }
}
