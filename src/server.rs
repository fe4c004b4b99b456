//! 서버 (파일 제공측)
//!
//! - 메인 소켓에서 제어 명령 수신 (모든 명령은 seq 0 신뢰 패킷)
//! - 응답과 데이터는 요청마다 생성한 워커가 자기 소켓으로 전송
//! - 같은 요청 식별자가 처리 중이면 중복 요청을 무시

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::catalog::Catalog;
use crate::message::{Command, LineBuffer, Reply};
use crate::packet::Packet;
use crate::reorder::ReorderBuffer;
use crate::sender::SlidingWindowSender;
use crate::session::{Received, Session, Shutdown};
use crate::stats::TransferStats;
use crate::{Config, Error, Result};

/// 처리 중인 요청과 같은 요청이 왔을 때의 동작
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// 중복 요청만 버리고 원래 요청은 계속 진행
    #[default]
    Ignore,

    /// 중복 요청과 함께 해당 피어의 남은 명령 줄도 버림
    DropPending,
}

/// 전송 요청 식별자
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    pub peer: SocketAddr,
    pub name: String,
    pub offset: u64,
    pub length: u64,
    pub seq: u32,
}

/// 처리 중인 요청 집합 (워커 간 공유)
#[derive(Debug, Clone, Default)]
pub struct ActiveRequests {
    inner: Arc<DashSet<RequestId>>,
}

impl ActiveRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// 요청 등록
    ///
    /// 이미 처리 중이면 None. 반환된 가드가 해제되면 등록도 해제된다.
    pub fn try_acquire(&self, id: RequestId) -> Option<RequestGuard> {
        if !self.inner.insert(id.clone()) {
            return None;
        }
        Some(RequestGuard {
            set: self.inner.clone(),
            id,
        })
    }

    pub fn contains(&self, id: &RequestId) -> bool {
        self.inner.contains(id)
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// 처리 중 표시 (drop 시 해제)
#[derive(Debug)]
pub struct RequestGuard {
    set: Arc<DashSet<RequestId>>,
    id: RequestId,
}

impl RequestGuard {
    pub fn id(&self) -> &RequestId {
        &self.id
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

/// 피어별 제어 상태
#[derive(Debug, Default)]
struct PeerState {
    lines: LineBuffer,
    handle: Option<String>,
}

impl PeerState {
    fn is_idle(&self) -> bool {
        self.lines.is_empty() && self.handle.is_none()
    }
}

/// 워커가 공유하는 서버 상태
#[derive(Clone)]
struct WorkerContext {
    config: Config,
    catalog: Catalog,
    shutdown: Shutdown,
    stats: Arc<RwLock<TransferStats>>,
    bind_ip: IpAddr,
}

impl WorkerContext {
    async fn open_session(&self) -> Result<Session> {
        Session::bind(
            SocketAddr::new(self.bind_ip, 0),
            self.config.clone(),
            self.shutdown.clone(),
        )
        .await
    }

    async fn build_reply(&self, command: &Command) -> Result<Reply> {
        let reply = match command {
            Command::Connect => Reply::Welcome,
            Command::FileList => Reply::Listing(self.catalog.listing().await?),
            Command::Size(name) => match self.catalog.size_of(name).await {
                Ok(size) => Reply::Size(size),
                Err(Error::FileNotFound(_)) => Reply::Error("not found".into()),
                Err(e) => return Err(e),
            },
            other => {
                return Err(Error::Protocol(format!("{} 명령에는 응답 없음", other.name())))
            }
        };
        Ok(reply)
    }

    /// 제어 명령 응답 전송 (seq 0, ACK 1 기대)
    async fn send_reply(self, peer: SocketAddr, command: Command) {
        let result = async {
            let reply = self.build_reply(&command).await?;
            let mut session = self.open_session().await?;
            let outcome = session
                .send_payload(peer, 0, reply.to_text().as_bytes())
                .await;
            self.stats.write().merge(session.stats());

            match outcome? {
                1 => Ok(()),
                ack => Err(Error::Protocol(format!("예상 밖 ACK {}", ack))),
            }
        }
        .await;

        match result {
            Ok(()) => debug!("{} 응답 완료: {}", peer, command.name()),
            Err(e) => warn!("{} 응답 실패 ({}): {}", peer, command.name(), e),
        }
    }

    /// 바이트 범위 전송
    async fn serve_range(self, guard: RequestGuard) {
        let id = guard.id().clone();

        let data = match self.catalog.read_range(&id.name, id.offset, id.length).await {
            Ok(data) => data,
            Err(e) => {
                warn!("{} 요청 처리 불가 {}: {}", id.peer, id.name, e);
                return;
            }
        };

        let mut session = match self.open_session().await {
            Ok(session) => session,
            Err(e) => {
                warn!("워커 소켓 생성 실패: {}", e);
                return;
            }
        };

        let packets = Packet::split(id.seq, &data, session.codec().max_payload());
        info!(
            "{} 전송 시작: {} [{}..+{}) seq {}부터 {} 패킷",
            id.peer,
            id.name,
            id.offset,
            data.len(),
            id.seq,
            packets.len()
        );

        let result = SlidingWindowSender::new(&mut session, id.peer)
            .send_all(&packets)
            .await;
        self.stats.write().merge(session.stats());

        match result {
            Ok(summary) => info!(
                "{} 전송 완료: {} {} bytes ({:.2}s, 재전송 {})",
                id.peer,
                id.name,
                summary.bytes,
                summary.elapsed.as_secs_f64(),
                summary.retransmissions
            ),
            Err(e) => warn!("{} 전송 실패: {}: {}", id.peer, id.name, e),
        }

        drop(guard);
    }
}

/// 파일 서버
pub struct Server {
    session: Session,
    ctx: WorkerContext,
    active: ActiveRequests,
    peers: HashMap<SocketAddr, PeerState>,
    workers: Vec<JoinHandle<()>>,
}

impl Server {
    /// 서버 바인딩
    pub async fn bind(addr: SocketAddr, folder: impl Into<PathBuf>, config: Config) -> Result<Self> {
        config.validate()?;

        let shutdown = Shutdown::new();
        let session = Session::bind(addr, config.clone(), shutdown.clone())
            .await?
            .with_idle_limit(None);
        let bind_ip = session.local_addr()?.ip();

        Ok(Self {
            session,
            ctx: WorkerContext {
                config,
                catalog: Catalog::new(folder),
                shutdown,
                stats: Arc::new(RwLock::new(TransferStats::new())),
                bind_ip,
            },
            active: ActiveRequests::new(),
            peers: HashMap::new(),
            workers: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.session.local_addr()
    }

    /// 종료 핸들
    pub fn shutdown_handle(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    /// 워커 통계 합계 (워커가 끝날 때마다 반영)
    pub fn stats(&self) -> Arc<RwLock<TransferStats>> {
        self.ctx.stats.clone()
    }

    pub fn active_requests(&self) -> ActiveRequests {
        self.active.clone()
    }

    pub fn catalog(&self) -> &Catalog {
        &self.ctx.catalog
    }

    /// 종료 요청까지 명령 처리
    ///
    /// 종료 후 남은 워커를 기다리고 전체 통계를 반환한다.
    pub async fn run(mut self) -> Result<TransferStats> {
        info!("서버 시작: {} ({})", self.local_addr()?, self.ctx.catalog.folder().display());

        let outcome = loop {
            let mut reorder = ReorderBuffer::new();
            match self.session.recv_reliable(0, &mut reorder).await {
                Ok(received) => self.handle_packet(received),
                Err(Error::Cancelled) => break Ok(()),
                Err(e) if e.is_fatal() => {
                    warn!("제어 소켓 에러: {}", e);
                    break Err(e);
                }
                Err(e) => debug!("제어 수신: {}", e),
            }
            self.workers.retain(|handle| !handle.is_finished());
        };

        info!("서버 종료 중, 워커 {} 대기", self.workers.len());
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                warn!("워커 비정상 종료: {}", e);
            }
        }

        let mut stats = self.ctx.stats.write();
        stats.merge(self.session.stats());
        let snapshot = stats.clone();
        drop(stats);

        info!("{}", snapshot.summary());
        outcome.map(|()| snapshot)
    }

    fn handle_packet(&mut self, received: Received) {
        let peer = received.peer;
        let text = match std::str::from_utf8(&received.payload) {
            Ok(text) => text,
            Err(_) => {
                warn!("{} 제어 메시지가 UTF-8이 아님", peer);
                return;
            }
        };

        let lines = self.peers.entry(peer).or_default().lines.push(text);
        for line in lines {
            match Command::parse(&line) {
                Ok(command) => {
                    if !self.dispatch(peer, command) {
                        break;
                    }
                }
                Err(e) => warn!("{} 명령 파싱 실패: {}", peer, e),
            }
        }

        // 미완성 줄도 등록 이름도 없는 피어는 기억하지 않음
        if self.peers.get(&peer).is_some_and(PeerState::is_idle) {
            self.peers.remove(&peer);
        }
    }

    /// 명령 처리, 피어의 남은 줄을 버려야 하면 false
    fn dispatch(&mut self, peer: SocketAddr, command: Command) -> bool {
        debug!("{} 명령: {}", peer, command);

        match command {
            Command::Connect => {
                info!("연결 요청: {}", peer);
                self.spawn_reply(peer, command);
            }
            Command::Handle(handle) => {
                info!("클라이언트 등록: {} ({})", peer, handle.as_deref().unwrap_or("-"));
                if let Some(state) = self.peers.get_mut(&peer) {
                    state.handle = handle;
                }
            }
            Command::FileList | Command::Size(_) => self.spawn_reply(peer, command),
            Command::Request {
                name,
                offset,
                length,
                seq,
            } => {
                let id = RequestId {
                    peer,
                    name,
                    offset,
                    length,
                    seq,
                };
                match self.active.try_acquire(id.clone()) {
                    Some(guard) => {
                        let ctx = self.ctx.clone();
                        self.workers.push(tokio::spawn(ctx.serve_range(guard)));
                    }
                    None => {
                        info!("처리 중인 요청과 중복, 무시: {:?}", id);
                        if self.ctx.config.duplicate_policy == DuplicatePolicy::DropPending {
                            if let Some(state) = self.peers.get_mut(&peer) {
                                state.lines.clear();
                            }
                            return false;
                        }
                    }
                }
            }
            Command::Ack(name) => {
                let handle = self
                    .peers
                    .get(&peer)
                    .and_then(|state| state.handle.clone())
                    .unwrap_or_else(|| peer.to_string());
                info!("{} 다운로드 완료: {}", handle, name);
            }
            Command::Exit => {
                info!("연결 종료: {}", peer);
                self.peers.remove(&peer);
                return false;
            }
        }

        true
    }

    fn spawn_reply(&mut self, peer: SocketAddr, command: Command) {
        let ctx = self.ctx.clone();
        self.workers.push(tokio::spawn(ctx.send_reply(peer, command)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(seq: u32) -> RequestId {
        RequestId {
            peer: "127.0.0.1:4000".parse().unwrap(),
            name: "a.bin".into(),
            offset: 0,
            length: 100,
            seq,
        }
    }

    #[test]
    fn test_duplicate_identity_rejected_until_released() {
        let active = ActiveRequests::new();

        let guard = active.try_acquire(id(0)).unwrap();
        assert!(active.try_acquire(id(0)).is_none());
        // 다른 식별자는 독립
        let other = active.try_acquire(id(5)).unwrap();
        assert_eq!(active.len(), 2);

        drop(guard);
        assert!(!active.contains(&id(0)));
        assert!(active.try_acquire(id(0)).is_some());
        drop(other);
        assert!(active.is_empty());
    }

    #[test]
    fn test_concurrent_acquire_single_winner() {
        let active = ActiveRequests::new();
        let winners: Vec<_> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let active = active.clone();
                    scope.spawn(move || active.try_acquire(id(1)))
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|h| h.join().unwrap())
                .collect()
        });
        assert_eq!(winners.len(), 1);
    }

    #[test]
    fn test_policy_serde() {
        let policy: DuplicatePolicy = serde_json::from_str("\"drop_pending\"").unwrap();
        assert_eq!(policy, DuplicatePolicy::DropPending);
        assert_eq!(DuplicatePolicy::default(), DuplicatePolicy::Ignore);
    }

    fn command(peer: SocketAddr, text: &str) -> Received {
        Received {
            payload: bytes::Bytes::copy_from_slice(text.as_bytes()),
            peer,
            next_expected: 1,
        }
    }

    #[tokio::test]
    async fn test_peer_state_kept_only_while_needed() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.bin"), b"0123456789")
            .await
            .unwrap();
        let mut server = Server::bind("127.0.0.1:0".parse().unwrap(), dir.path(), Config::default())
            .await
            .unwrap();
        let client = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer = client.local_addr().unwrap();
        let worker = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let range_peer = worker.local_addr().unwrap();

        // 범위 워커 소켓은 EXIT 없이 사라짐
        server.handle_packet(command(range_peer, "REQUEST a.bin 0 10 0\n"));
        assert!(server.peers.is_empty());
        assert_eq!(server.active.len(), 1);

        // 미완성 줄은 다음 패킷까지 보관
        server.handle_packet(command(peer, "SIZE a."));
        assert_eq!(server.peers.len(), 1);
        server.handle_packet(command(peer, "bin\n"));
        assert!(server.peers.is_empty());

        // 등록된 피어는 EXIT까지 유지
        server.handle_packet(command(peer, "HANDLE tester\n"));
        assert_eq!(server.peers.len(), 1);
        server.handle_packet(command(peer, "EXIT\n"));
        assert!(server.peers.is_empty());

        server.ctx.shutdown.trigger();
        for handle in server.workers.drain(..) {
            handle.await.unwrap();
        }
        assert!(server.active.is_empty());
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = Config {
            min_window: 0,
            ..Config::default()
        };
        let result = Server::bind("127.0.0.1:0".parse().unwrap(), ".", config).await;
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }
}
