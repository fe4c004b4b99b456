//! 테스트용 UDP 중계기
//!
//! 클라이언트와 서버 사이에서 지연, 손실, 재정렬, 중복, 손상을 흉내낸다.
//!
//! 서버의 소켓(메인 + 워커)마다 클라이언트 쪽 대리 소켓을 하나씩 두므로
//! 클라이언트는 서버 워커를 서로 다른 주소로 보게 된다. 서버 메인 소켓의
//! 대리는 중계기의 대표 주소다.
//!
//! 장애는 서버 → 클라이언트 방향의 데이터 패킷(4바이트 초과)에만 적용하고
//! 지연은 모든 방향에 적용한다.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;

use rdt::{Config, TransferStats, ACK_LEN, SEQ_LEN};

/// 중계기 장애 설정
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// 단방향 지연
    pub latency: Duration,

    /// seq % n == n - 1 인 데이터 패킷을 처음 한 번만 버림
    pub drop_every_nth: Option<u32>,

    pub loss: f64,
    pub reorder: f64,
    pub duplicate: f64,
    pub corrupt: f64,

    pub seed: u64,

    /// 다이제스트 필드 길이 (seq 위치 계산용)
    pub digest_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            latency: Duration::ZERO,
            drop_every_nth: None,
            loss: 0.0,
            reorder: 0.0,
            duplicate: 0.0,
            corrupt: 0.0,
            seed: 7,
            digest_len: 32,
        }
    }
}

struct Outgoing {
    due: Instant,
    data: Vec<u8>,
    to: SocketAddr,
}

/// 송신 소켓 하나와 그 지연 큐
struct Endpoint {
    socket: Arc<UdpSocket>,
    queue: mpsc::UnboundedSender<Outgoing>,
    held: Mutex<Option<Outgoing>>,
}

impl Endpoint {
    fn new(socket: Arc<UdpSocket>) -> Arc<Self> {
        let (queue, mut rx) = mpsc::unbounded_channel::<Outgoing>();
        let sender = socket.clone();
        tokio::spawn(async move {
            while let Some(out) = rx.recv().await {
                tokio::time::sleep_until(out.due).await;
                let _ = sender.send_to(&out.data, out.to).await;
            }
        });
        Arc::new(Self {
            socket,
            queue,
            held: Mutex::new(None),
        })
    }

    fn bind() -> Arc<Self> {
        let std_socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        std_socket.set_nonblocking(true).unwrap();
        Self::new(Arc::new(UdpSocket::from_std(std_socket).unwrap()))
    }

    fn push(&self, out: Outgoing) {
        let _ = self.queue.send(out);
    }
}

struct Inner {
    server: SocketAddr,
    config: RelayConfig,
    front: Arc<Endpoint>,
    upstreams: Mutex<HashMap<SocketAddr, Arc<Endpoint>>>,
    mirrors: Mutex<HashMap<(SocketAddr, SocketAddr), Arc<Endpoint>>>,
    rng: Mutex<StdRng>,
    seen: Mutex<HashSet<(SocketAddr, u32)>>,
    dropped: AtomicU64,
    forwarded: AtomicU64,
}

impl Inner {
    /// 클라이언트별 서버 방향 소켓
    fn upstream_for(self: &Arc<Self>, client: SocketAddr) -> Arc<Endpoint> {
        let mut upstreams = self.upstreams.lock();
        if let Some(endpoint) = upstreams.get(&client) {
            return endpoint.clone();
        }

        let endpoint = Endpoint::bind();
        upstreams.insert(client, endpoint.clone());

        let inner = self.clone();
        let socket = endpoint.socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let (len, src) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let out = inner.mirror_for(client, src);
                inner.to_client(&out, src, buf[..len].to_vec(), client);
            }
        });

        endpoint
    }

    /// 서버 소켓별 클라이언트 방향 대리 소켓
    fn mirror_for(self: &Arc<Self>, client: SocketAddr, server_src: SocketAddr) -> Arc<Endpoint> {
        if server_src == self.server {
            return self.front.clone();
        }

        let mut mirrors = self.mirrors.lock();
        if let Some(endpoint) = mirrors.get(&(client, server_src)) {
            return endpoint.clone();
        }

        let endpoint = Endpoint::bind();
        mirrors.insert((client, server_src), endpoint.clone());

        let inner = self.clone();
        let socket = endpoint.socket.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                if from != client {
                    continue;
                }
                let upstream = inner.upstream_for(client);
                inner.to_server(&upstream, buf[..len].to_vec(), server_src);
            }
        });

        endpoint
    }

    fn to_server(&self, via: &Endpoint, data: Vec<u8>, to: SocketAddr) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        via.push(Outgoing {
            due: Instant::now() + self.config.latency,
            data,
            to,
        });
    }

    fn to_client(&self, via: &Endpoint, src: SocketAddr, mut data: Vec<u8>, to: SocketAddr) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        let due = Instant::now() + self.config.latency;

        let header = self.config.digest_len + SEQ_LEN;
        if data.len() <= ACK_LEN || data.len() < header {
            via.push(Outgoing { due, data, to });
            return;
        }

        let at = self.config.digest_len;
        let seq = u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        if let Some(n) = self.config.drop_every_nth {
            if seq % n == n - 1 && self.seen.lock().insert((src, seq)) {
                self.dropped.fetch_add(1, Ordering::SeqCst);
                return;
            }
        }

        let (lose, corrupt, duplicate, reorder) = {
            let mut rng = self.rng.lock();
            (
                rng.gen_bool(self.config.loss),
                rng.gen_bool(self.config.corrupt),
                rng.gen_bool(self.config.duplicate),
                rng.gen_bool(self.config.reorder),
            )
        };

        if lose {
            self.dropped.fetch_add(1, Ordering::SeqCst);
            return;
        }
        if corrupt {
            let last = data.len() - 1;
            data[last] ^= 0x5A;
        }

        let mut held = via.held.lock();
        if reorder && held.is_none() {
            // 다음 패킷 뒤로 보냄
            *held = Some(Outgoing { due, data, to });
            return;
        }

        if duplicate {
            via.push(Outgoing {
                due,
                data: data.clone(),
                to,
            });
        }
        via.push(Outgoing { due, data, to });
        if let Some(mut late) = held.take() {
            late.due = due;
            via.push(late);
        }
    }
}

/// 실행 중인 중계기
pub struct Relay {
    inner: Arc<Inner>,
}

impl Relay {
    /// `server` 앞에 중계기 시작
    pub async fn start(server: SocketAddr, config: RelayConfig) -> Relay {
        let front = Endpoint::bind();
        let inner = Arc::new(Inner {
            server,
            rng: Mutex::new(StdRng::seed_from_u64(config.seed)),
            config,
            front: front.clone(),
            upstreams: Mutex::new(HashMap::new()),
            mirrors: Mutex::new(HashMap::new()),
            seen: Mutex::new(HashSet::new()),
            dropped: AtomicU64::new(0),
            forwarded: AtomicU64::new(0),
        });

        let relay = inner.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 65536];
            loop {
                let (len, client) = match front.socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(_) => continue,
                };
                let upstream = relay.upstream_for(client);
                relay.to_server(&upstream, buf[..len].to_vec(), relay.server);
            }
        });

        Relay { inner }
    }

    /// 클라이언트가 접속할 주소
    pub fn addr(&self) -> SocketAddr {
        self.inner.front.socket.local_addr().unwrap()
    }

    /// 버린 데이터 패킷 수
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }

    pub fn forwarded(&self) -> u64 {
        self.inner.forwarded.load(Ordering::Relaxed)
    }
}

/// 테스트용 빠른 설정
pub fn test_config() -> Config {
    Config {
        max_datagram_size: 1036,
        initial_timeout_ms: 300,
        min_timeout_ms: 200,
        max_timeout_ms: 2000,
        max_transmissions: Some(20),
        max_idle_polls: Some(20),
        ..Config::default()
    }
}

/// 결정적인 테스트 데이터
pub fn sample_bytes(len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(len as u64);
    (0..len).map(|_| rng.gen()).collect()
}

/// 서버 시작, (주소, 종료 핸들, 실행 핸들)
pub async fn start_server(
    folder: &std::path::Path,
    config: Config,
) -> (
    SocketAddr,
    rdt::Shutdown,
    rdt::ActiveRequests,
    tokio::task::JoinHandle<rdt::Result<TransferStats>>,
) {
    let server = rdt::Server::bind("127.0.0.1:0".parse().unwrap(), folder, config)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    let shutdown = server.shutdown_handle();
    let active = server.active_requests();
    let handle = tokio::spawn(server.run());
    (addr, shutdown, active, handle)
}
