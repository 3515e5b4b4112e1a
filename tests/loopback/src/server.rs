use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufStream};
use tracing::{debug, info, warn};

use gridlink_crypto::{
    Decryptor, EncryptionCodec, EncryptionWrapperFactory, Encryptor, NegotiatedSession,
};
use gridlink_data_channel::wire::{
    read_data_frame, read_encrypted_frame, write_data_frame, write_encrypted_frame,
    write_end_marker,
};
use gridlink_data_channel::{DataChannelError, MAX_DATA_FRAME, read_control, write_control};
use gridlink_protocol::control::error_code;
use gridlink_protocol::{
    ControlMessage, NegotiationOutcome, PipelineConfiguration, ServerCapabilities,
    SslNegotiationPolicy, TransferOperation,
};

use crate::token::{issue_token, tokens_match};

/// Payload size of data frames the server sends.
const SERVER_FRAME: usize = 64 * 1024;

/// Faults the server injects into later sessions.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Drop the session, without replying, when a range starting at this
    /// offset is requested.
    pub drop_range_at: Option<u64>,
    /// Report a wrong checksum on commit.
    pub corrupt_checksum: bool,
    /// Pause before every data frame sent for a `Get`.
    pub frame_delay: Option<Duration>,
}

/// Counters since the server was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub sessions: usize,
    pub active_sessions: usize,
    pub logins: usize,
    pub failed_logins: usize,
    pub ranges: usize,
    pub commits: usize,
    pub aborts: usize,
}

#[derive(Default)]
struct Counters {
    sessions: AtomicUsize,
    active_sessions: AtomicUsize,
    logins: AtomicUsize,
    failed_logins: AtomicUsize,
    ranges: AtomicUsize,
    commits: AtomicUsize,
    aborts: AtomicUsize,
}

struct AccountEntry {
    password: String,
    one_time: bool,
    used: bool,
}

struct PendingTransfer {
    token: String,
    logical_path: String,
    operation: TransferOperation,
    data: Vec<u8>,
}

struct Inner {
    policy: SslNegotiationPolicy,
    config: PipelineConfiguration,
    max_streams: AtomicU32,
    accounts: Mutex<HashMap<(String, String), AccountEntry>>,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    transfers: Mutex<Vec<PendingTransfer>>,
    faults: Mutex<Faults>,
    counters: Counters,
}

/// In-memory storage server speaking the gridlink session protocol.
#[derive(Clone)]
pub struct LoopbackServer {
    inner: Arc<Inner>,
}

impl LoopbackServer {
    /// Server with default encryption parameters (AES-256-CBC).
    pub fn new(policy: SslNegotiationPolicy) -> Self {
        Self::with_config(policy, PipelineConfiguration::default())
    }

    /// Server offering the encryption parameters of `config`.
    pub fn with_config(policy: SslNegotiationPolicy, config: PipelineConfiguration) -> Self {
        Self {
            inner: Arc::new(Inner {
                policy,
                config,
                max_streams: AtomicU32::new(16),
                accounts: Mutex::new(HashMap::new()),
                objects: Mutex::new(HashMap::new()),
                transfers: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
                counters: Counters::default(),
            }),
        }
    }

    pub fn set_max_streams(&self, max_streams: u32) {
        self.inner.max_streams.store(max_streams, Ordering::Relaxed);
    }

    pub fn add_account(&self, user_name: &str, zone: &str, password: &str) {
        self.insert_account(user_name, zone, password, false);
    }

    /// Adds, or re-issues, a password that authenticates exactly once.
    pub fn add_one_time_account(&self, user_name: &str, zone: &str, password: &str) {
        self.insert_account(user_name, zone, password, true);
    }

    fn insert_account(&self, user_name: &str, zone: &str, password: &str, one_time: bool) {
        lock(&self.inner.accounts).insert(
            (user_name.to_string(), zone.to_string()),
            AccountEntry {
                password: password.to_string(),
                one_time,
                used: false,
            },
        );
    }

    pub fn put_object(&self, logical_path: &str, data: Vec<u8>) {
        lock(&self.inner.objects).insert(logical_path.to_string(), data);
    }

    pub fn object(&self, logical_path: &str) -> Option<Vec<u8>> {
        lock(&self.inner.objects).get(logical_path).cloned()
    }

    pub fn set_faults(&self, faults: Faults) {
        *lock(&self.inner.faults) = faults;
    }

    /// Transfers granted but not yet committed or abandoned.
    pub fn pending_transfers(&self) -> usize {
        lock(&self.inner.transfers).len()
    }

    pub fn stats(&self) -> ServerStats {
        let c = &self.inner.counters;
        ServerStats {
            sessions: c.sessions.load(Ordering::SeqCst),
            active_sessions: c.active_sessions.load(Ordering::SeqCst),
            logins: c.logins.load(Ordering::SeqCst),
            failed_logins: c.failed_logins.load(Ordering::SeqCst),
            ranges: c.ranges.load(Ordering::SeqCst),
            commits: c.commits.load(Ordering::SeqCst),
            aborts: c.aborts.load(Ordering::SeqCst),
        }
    }

    /// Runs one session to completion on `stream`.
    pub async fn serve<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let counters = &self.inner.counters;
        counters.sessions.fetch_add(1, Ordering::SeqCst);
        counters.active_sessions.fetch_add(1, Ordering::SeqCst);

        let mut io = BufStream::new(stream);
        let mut session = Session {
            inner: &self.inner,
            crypto: None,
        };
        match session.run(&mut io).await {
            Ok(()) => debug!("session ended"),
            Err(e) => debug!(error = %e, "session aborted"),
        }
        let _ = io.shutdown().await;

        counters.active_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Session<'a> {
    inner: &'a Inner,
    crypto: Option<Arc<NegotiatedSession>>,
}

impl Session<'_> {
    async fn run<S>(&mut self, io: &mut S) -> Result<(), DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        if !self.handshake(io).await? {
            return Ok(());
        }

        loop {
            match read_control(io).await? {
                ControlMessage::Ping => write_control(io, &ControlMessage::Pong).await?,
                ControlMessage::BeginTransfer {
                    logical_path,
                    operation,
                    total_bytes,
                    requested_streams,
                } => {
                    let reply = self.begin(logical_path, operation, total_bytes, requested_streams);
                    write_control(io, &reply).await?;
                }
                ControlMessage::StreamRange {
                    token,
                    offset,
                    length,
                } => self.stream_range(io, &token, offset, length).await?,
                ControlMessage::EndTransfer { token, commit } => {
                    let reply = self.end(&token, commit);
                    write_control(io, &reply).await?;
                }
                ControlMessage::Disconnect => return Ok(()),
                other => {
                    let reply = ControlMessage::error(
                        error_code::BAD_REQUEST,
                        format!("unexpected {}", other.kind()),
                    );
                    write_control(io, &reply).await?;
                }
            }
        }
    }

    /// Returns `false` when the session ends during the handshake.
    async fn handshake<S>(&mut self, io: &mut S) -> Result<bool, DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let ControlMessage::Startup { client_host, .. } = read_control(io).await? else {
            return Err(DataChannelError::Protocol("expected startup".into()));
        };
        let ControlMessage::Negotiate(offer) = read_control(io).await? else {
            return Err(DataChannelError::Protocol("expected negotiate".into()));
        };

        let caps = ServerCapabilities::with_policy(self.inner.policy, &self.inner.config);
        write_control(io, &ControlMessage::ServerNegotiation(caps.clone())).await?;

        let ControlMessage::NegotiationResult { outcome } = read_control(io).await? else {
            return Err(DataChannelError::Protocol("expected negotiation result".into()));
        };
        if outcome != NegotiationOutcome::resolve(offer.policy, self.inner.policy) {
            let reply = ControlMessage::error(error_code::BAD_REQUEST, "negotiation mismatch");
            write_control(io, &reply).await?;
            return Ok(false);
        }

        match outcome {
            NegotiationOutcome::Failure => return Ok(false),
            NegotiationOutcome::UseTcp => {}
            NegotiationOutcome::UseSsl => {
                let ControlMessage::SharedSecret { key } = read_control(io).await? else {
                    return Err(DataChannelError::Protocol("expected shared secret".into()));
                };
                let session = NegotiatedSession::encrypted(
                    caps.algorithm,
                    caps.key_size,
                    caps.salt_size,
                    caps.hash_rounds,
                );
                session.install_shared_key(key)?;
                self.crypto = Some(Arc::new(session));
                write_control(io, &ControlMessage::Ok).await?;
            }
        }

        let mut challenge = vec![0u8; 16];
        rand::thread_rng().fill_bytes(&mut challenge);
        write_control(
            io,
            &ControlMessage::AuthChallenge {
                challenge: challenge.clone(),
            },
        )
        .await?;

        let ControlMessage::AuthResponse {
            user_name,
            zone,
            response,
        } = read_control(io).await?
        else {
            return Err(DataChannelError::Protocol("expected auth response".into()));
        };

        let counters = &self.inner.counters;
        if !self.authenticate(&user_name, &zone, &challenge, &response) {
            counters.failed_logins.fetch_add(1, Ordering::SeqCst);
            warn!(user = %user_name, %zone, "login rejected");
            let reply = ControlMessage::error(error_code::AUTH_FAILED, "authentication failed");
            write_control(io, &reply).await?;
            return Ok(false);
        }

        counters.logins.fetch_add(1, Ordering::SeqCst);
        info!(user = %user_name, %zone, host = %client_host, ssl = self.crypto.is_some(), "login");
        write_control(io, &ControlMessage::Ok).await?;
        Ok(true)
    }

    fn authenticate(&self, user_name: &str, zone: &str, challenge: &[u8], response: &str) -> bool {
        let mut accounts = lock(&self.inner.accounts);
        let Some(entry) = accounts.get_mut(&(user_name.to_string(), zone.to_string())) else {
            return false;
        };
        if entry.one_time && entry.used {
            return false;
        }

        let mut hasher = Sha256::new();
        hasher.update(challenge);
        hasher.update(entry.password.as_bytes());
        if !tokens_match(response, &hex::encode(hasher.finalize())) {
            return false;
        }
        if entry.one_time {
            entry.used = true;
        }
        true
    }

    fn begin(
        &self,
        logical_path: String,
        operation: TransferOperation,
        total_bytes: Option<u64>,
        requested_streams: u32,
    ) -> ControlMessage {
        let data = match operation {
            TransferOperation::Put => match total_bytes {
                Some(total) => vec![0u8; total as usize],
                None => {
                    return ControlMessage::error(error_code::BAD_REQUEST, "put needs a size");
                }
            },
            TransferOperation::Get => match lock(&self.inner.objects).get(&logical_path) {
                Some(data) => data.clone(),
                None => {
                    return ControlMessage::error(
                        error_code::NOT_FOUND,
                        format!("{logical_path} does not exist"),
                    );
                }
            },
        };

        let token = issue_token();
        let max_streams = requested_streams
            .max(1)
            .min(self.inner.max_streams.load(Ordering::Relaxed).max(1));
        let total_bytes = data.len() as u64;
        debug!(path = %logical_path, ?operation, total_bytes, max_streams, "transfer granted");

        lock(&self.inner.transfers).push(PendingTransfer {
            token: token.clone(),
            logical_path,
            operation,
            data,
        });
        ControlMessage::TransferGrant {
            token,
            total_bytes,
            max_streams,
        }
    }

    async fn stream_range<S>(
        &self,
        io: &mut S,
        token: &str,
        offset: u64,
        length: u64,
    ) -> Result<(), DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let faults = lock(&self.inner.faults).clone();
        if faults.drop_range_at == Some(offset) {
            return Err(DataChannelError::Protocol(format!(
                "injected fault at offset {offset}"
            )));
        }

        let lookup = self.with_transfer(token, |t| {
            let end = offset.checked_add(length)?;
            if end > t.data.len() as u64 {
                return None;
            }
            let chunk = match t.operation {
                TransferOperation::Get => t.data[offset as usize..end as usize].to_vec(),
                TransferOperation::Put => Vec::new(),
            };
            Some((t.operation, chunk))
        });
        let (operation, chunk) = match lookup {
            None => {
                let reply = ControlMessage::error(error_code::NOT_FOUND, "unknown transfer");
                return write_control(io, &reply).await;
            }
            Some(None) => {
                let reply = ControlMessage::error(error_code::BAD_REQUEST, "range out of bounds");
                return write_control(io, &reply).await;
            }
            Some(Some(found)) => found,
        };

        write_control(io, &ControlMessage::Ok).await?;
        self.inner.counters.ranges.fetch_add(1, Ordering::SeqCst);

        let bytes = match operation {
            TransferOperation::Put => self.receive_put(io, token, offset, length).await?,
            TransferOperation::Get => self.send_get(io, &chunk, faults.frame_delay).await?,
        };
        write_control(io, &ControlMessage::RangeAck { bytes }).await
    }

    /// Reads frames up to the end marker. A cancelled client ends the range
    /// early, so fewer bytes than requested are accepted.
    async fn receive_put<S>(
        &self,
        io: &mut S,
        token: &str,
        offset: u64,
        length: u64,
    ) -> Result<u64, DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let decryptor = self.decryptor()?;
        let mut received = Vec::new();
        loop {
            let payload = match &decryptor {
                Some(decryptor) => match read_encrypted_frame(io, MAX_DATA_FRAME).await? {
                    Some(buffer) => Some(decryptor.decrypt(&buffer)?),
                    None => None,
                },
                None => read_data_frame(io, MAX_DATA_FRAME).await?,
            };
            let Some(payload) = payload else {
                break;
            };
            received.extend_from_slice(&payload);
            if received.len() as u64 > length {
                return Err(DataChannelError::Protocol("range overrun".into()));
            }
        }

        let start = offset as usize;
        let stored = self.with_transfer(token, |t| {
            t.data[start..start + received.len()].copy_from_slice(&received);
        });
        if stored.is_none() {
            warn!("transfer abandoned while a range was in flight");
        }
        Ok(received.len() as u64)
    }

    async fn send_get<S>(
        &self,
        io: &mut S,
        chunk: &[u8],
        frame_delay: Option<Duration>,
    ) -> Result<u64, DataChannelError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut encryptor = self.encryptor()?;
        for piece in chunk.chunks(SERVER_FRAME) {
            if let Some(delay) = frame_delay {
                io.flush().await?;
                tokio::time::sleep(delay).await;
            }
            match encryptor.as_mut() {
                Some(encryptor) => write_encrypted_frame(io, &encryptor.encrypt(piece)?).await?,
                None => write_data_frame(io, piece).await?,
            }
        }
        write_end_marker(io).await?;
        Ok(chunk.len() as u64)
    }

    fn end(&self, token: &str, commit: bool) -> ControlMessage {
        let pending = {
            let mut transfers = lock(&self.inner.transfers);
            let index = transfers.iter().position(|t| tokens_match(token, &t.token));
            index.map(|i| transfers.swap_remove(i))
        };
        let Some(pending) = pending else {
            return ControlMessage::error(error_code::NOT_FOUND, "unknown transfer");
        };

        let counters = &self.inner.counters;
        if !commit {
            counters.aborts.fetch_add(1, Ordering::SeqCst);
            debug!(path = %pending.logical_path, "transfer abandoned");
            return ControlMessage::TransferCommitted { checksum: None };
        }

        let mut checksum = hex::encode(Sha256::digest(&pending.data));
        if lock(&self.inner.faults).corrupt_checksum {
            checksum = "0".repeat(checksum.len());
        }
        if pending.operation == TransferOperation::Put {
            lock(&self.inner.objects).insert(pending.logical_path.clone(), pending.data);
        }
        counters.commits.fetch_add(1, Ordering::SeqCst);
        info!(path = %pending.logical_path, "transfer committed");
        ControlMessage::TransferCommitted {
            checksum: Some(checksum),
        }
    }

    fn with_transfer<R>(
        &self,
        token: &str,
        f: impl FnOnce(&mut PendingTransfer) -> R,
    ) -> Option<R> {
        lock(&self.inner.transfers)
            .iter_mut()
            .find(|t| tokens_match(token, &t.token))
            .map(f)
    }

    fn encryptor(&self) -> Result<Option<Encryptor>, DataChannelError> {
        let Some(session) = &self.crypto else {
            return Ok(None);
        };
        let mut encryptor = EncryptionWrapperFactory::encryptor(&self.inner.config, Arc::clone(session))?;
        encryptor.init()?;
        Ok(Some(encryptor))
    }

    fn decryptor(&self) -> Result<Option<Decryptor>, DataChannelError> {
        let Some(session) = &self.crypto else {
            return Ok(None);
        };
        let mut decryptor = EncryptionWrapperFactory::decryptor(&self.inner.config, Arc::clone(session))?;
        decryptor.init()?;
        Ok(Some(decryptor))
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
