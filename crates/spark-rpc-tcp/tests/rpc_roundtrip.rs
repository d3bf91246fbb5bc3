//! `rpc_roundtrip` 集成测试：客户端端点与服务端通道通过真实 TCP 连接互通。
//!
//! # 测试目标（Why）
//! - 锁定“请求发出 → 服务端按票据回复 → 发起者被唤醒”的完整链路；
//! - 覆盖并发发起、乱序响应、超时撤回、关闭失败在途请求等连接级行为。
//!
//! # 结构安排（How）
//! - 每个测试在 `127.0.0.1:0` 上启动一个服务端线程，测试结束时由客户端关闭连接；
//! - `OpRequest`/`StatusResponse` 是最小化的业务消息，用来观察负载是否被原样解码。

use bytes::{BufMut, BytesMut};
use spark_rpc_tcp::{
    CloseReason, Message, RawMessage, RpcEndpoint, RpcError, RpcGroup, RpcListener,
    ServerChannel, Ticket, WireError,
};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// 1 字节操作码 + 任意负载。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct OpRequest {
    opcode: u8,
    body: Vec<u8>,
}

impl Message for OpRequest {
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, WireError> {
        dst.put_u8(self.opcode);
        dst.put_slice(&self.body);
        Ok(1 + self.body.len())
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let (opcode, body) = payload
            .split_first()
            .ok_or_else(|| WireError::codec("request lacks an opcode"))?;
        self.opcode = *opcode;
        self.body = body.to_vec();
        Ok(())
    }
}

/// 4 字节状态码。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct StatusResponse {
    status: u32,
}

impl Default for StatusResponse {
    fn default() -> Self {
        Self { status: u32::MAX }
    }
}

impl Message for StatusResponse {
    fn encode(&self, dst: &mut BytesMut) -> Result<usize, WireError> {
        dst.put_u32(self.status);
        Ok(4)
    }

    fn decode(&mut self, payload: &[u8]) -> Result<(), WireError> {
        let bytes: [u8; 4] = payload
            .try_into()
            .map_err(|_| WireError::codec("status must be 4 bytes"))?;
        self.status = u32::from_be_bytes(bytes);
        Ok(())
    }
}

fn serve<F>(group: &RpcGroup, handler: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(ServerChannel) + Send + 'static,
{
    let listener = RpcListener::bind(group, "127.0.0.1:0").expect("绑定失败");
    let addr = listener.local_addr();
    let server = thread::spawn(move || {
        let channel = listener.accept().expect("接受失败");
        handler(channel);
    });
    (addr, server)
}

/// 原样回显每个请求，直到对端关闭。
fn echo_until_closed(mut channel: ServerChannel) {
    let mut request = RawMessage::default();
    loop {
        match channel.receive(&mut request) {
            Ok(ticket) => {
                channel.transmit(ticket, &request).expect("回复失败");
            }
            Err(RpcError::Closed(CloseReason::PeerClosed)) => return,
            Err(err) => panic!("服务端收到意外错误: {err}"),
        }
    }
}

#[test]
fn opcode_request_gets_status_response() {
    let group = RpcGroup::new();
    let (addr, server) = serve(&group, |mut channel| {
        let mut request = OpRequest::default();
        let ticket = channel.receive(&mut request).expect("接收失败");
        assert_eq!(ticket, Ticket::FIRST);
        assert_eq!(request.opcode, 1);
        assert_eq!(request.body, (0..8).collect::<Vec<u8>>());
        channel
            .transmit(ticket, &StatusResponse { status: 0 })
            .expect("回复失败");
    });

    let endpoint: RpcEndpoint<OpRequest, StatusResponse> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    assert_eq!(endpoint.remote_addr(), addr);
    let request = OpRequest {
        opcode: 1,
        body: (0..8).collect(),
    };
    let handle = endpoint
        .issue_request(request.clone(), StatusResponse::default())
        .expect("发起失败");
    assert_eq!(handle.ticket(), Ticket::FIRST);
    assert_eq!(handle.request(), &request);

    let response = handle.wait().expect("等待失败");
    assert_eq!(response.status, 0);
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn concurrent_issuers_receive_their_own_responses() {
    const THREADS: usize = 8;
    const ROUNDS: usize = 50;
    let group = RpcGroup::new().with_queue_depth(4).with_message_size(128);
    let (addr, server) = serve(&group, echo_until_closed);

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let workers: Vec<_> = (0..THREADS)
        .map(|worker| {
            let endpoint = endpoint.clone();
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    let body = format!("worker-{worker}-round-{round}").into_bytes();
                    let handle = endpoint
                        .issue_request(RawMessage::new(body.clone()), RawMessage::default())
                        .expect("发起失败");
                    let response = handle.wait().expect("等待失败");
                    assert_eq!(response.payload().as_ref(), body.as_slice());
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("发起线程不应 panic");
    }
    assert_eq!(endpoint.pending_requests(), 0);
    endpoint.close().expect("关闭失败");
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn out_of_order_responses_reach_their_issuers() {
    let group = RpcGroup::new();
    let (addr, server) = serve(&group, |mut channel| {
        let mut request = RawMessage::default();
        let first = channel.receive(&mut request).expect("接收失败");
        let second = channel.receive(&mut request).expect("接收失败");
        channel
            .transmit(second, &RawMessage::new(&b"second"[..]))
            .expect("回复失败");
        channel
            .transmit(first, &RawMessage::new(&b"first"[..]))
            .expect("回复失败");
    });

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let first = endpoint
        .issue_request(RawMessage::new(&b"1"[..]), RawMessage::default())
        .expect("发起失败");
    let second = endpoint
        .issue_request(RawMessage::new(&b"2"[..]), RawMessage::default())
        .expect("发起失败");

    assert_eq!(first.wait().expect("等待失败").payload().as_ref(), b"first");
    assert!(second.is_done(), "第二个响应先到，已在等待第一个时被投递");
    assert_eq!(second.wait().expect("等待失败").payload().as_ref(), b"second");
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn local_close_fails_pending_handles() {
    let group = RpcGroup::new();
    let (release, hold) = mpsc::channel::<()>();
    let (addr, server) = serve(&group, move |mut channel| {
        let mut request = RawMessage::default();
        channel.receive(&mut request).expect("接收失败");
        let _ = hold.recv();
    });

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let handle = endpoint
        .issue_request(RawMessage::new(&b"never answered"[..]), RawMessage::default())
        .expect("发起失败");
    endpoint.close().expect("关闭失败");
    endpoint.close().expect("重复关闭无副作用");

    assert!(handle.is_done(), "关闭时在途请求被立即失败");
    assert!(matches!(
        handle.wait(),
        Err(RpcError::Closed(CloseReason::LocalClose))
    ));
    assert!(matches!(
        endpoint.issue_request(RawMessage::default(), RawMessage::default()),
        Err(RpcError::Closed(CloseReason::LocalClose))
    ));
    drop(release);
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn timed_out_request_is_withdrawn_and_late_response_discarded() {
    let group = RpcGroup::new();
    let (go, wait_for_go) = mpsc::channel::<()>();
    let (addr, server) = serve(&group, move |mut channel| {
        let mut request = RawMessage::default();
        let late = channel.receive(&mut request).expect("接收失败");
        wait_for_go.recv().expect("客户端仍在");
        channel
            .transmit(late, &RawMessage::new(&b"too late"[..]))
            .expect("回复失败");
        let next = channel.receive(&mut request).expect("接收失败");
        channel
            .transmit(next, &RawMessage::new(&b"on time"[..]))
            .expect("回复失败");
    });

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let slow = endpoint
        .issue_request(RawMessage::new(&b"slow"[..]), RawMessage::default())
        .expect("发起失败");
    let ticket = slow.ticket();
    match slow.wait_timeout(Duration::from_millis(50)) {
        Err(RpcError::Timeout {
            ticket: timed_out,
            waited,
        }) => {
            assert_eq!(timed_out, ticket);
            assert!(waited >= Duration::from_millis(50));
        }
        other => panic!("expected timeout, got {other:?}"),
    }
    assert_eq!(endpoint.pending_requests(), 0);

    go.send(()).expect("服务端仍在");
    let response = endpoint
        .issue_request(RawMessage::new(&b"fast"[..]), RawMessage::default())
        .expect("发起失败")
        .wait()
        .expect("迟到的响应被丢弃后，连接仍可用");
    assert_eq!(response.payload().as_ref(), b"on time");
    assert!(!endpoint.is_closed());
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn oversized_frame_header_closes_endpoint() {
    let raw = TcpListener::bind("127.0.0.1:0").expect("绑定失败");
    let addr = raw.local_addr().expect("读取地址失败");
    let server = thread::spawn(move || {
        let (mut stream, _) = raw.accept().expect("接受失败");
        let mut request = [0u8; 12];
        stream.read_exact(&mut request).expect("读取请求失败");
        let mut header = [0u8; 12];
        header[..4].copy_from_slice(&10_000u32.to_be_bytes());
        header[4..].copy_from_slice(&1u64.to_be_bytes());
        stream.write_all(&header).expect("写入失败");
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest);
    });

    let group = RpcGroup::new().with_message_size(64);
    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let handle = endpoint
        .issue_request(RawMessage::default(), RawMessage::default())
        .expect("发起失败");

    match handle.wait() {
        Err(RpcError::Closed(CloseReason::Failed(detail))) => {
            assert!(detail.contains("exceeds"), "unexpected detail: {detail}");
        }
        other => panic!("expected protocol failure, got {other:?}"),
    }
    assert!(endpoint.is_closed());
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn oversized_request_header_is_connection_fatal_on_server() {
    let group = RpcGroup::new().with_message_size(64);
    let (addr, server) = serve(&group, |mut channel| {
        let mut request = RawMessage::default();
        let err = channel.receive(&mut request).expect_err("帧头声明的长度超过容量");
        assert!(err.is_connection_fatal(), "协议违例之后字节流不可再用: {err:?}");
        match err {
            RpcError::Closed(CloseReason::Failed(detail)) => {
                assert!(detail.contains("exceeds"), "unexpected detail: {detail}");
            }
            other => panic!("expected protocol failure, got {other:?}"),
        }
        channel.close().expect("关闭失败");
    });

    let mut client = TcpStream::connect(addr).expect("建连失败");
    let mut header = [0u8; 12];
    header[..4].copy_from_slice(&10_000u32.to_be_bytes());
    header[4..].copy_from_slice(&1u64.to_be_bytes());
    client.write_all(&header).expect("写入失败");
    let mut rest = Vec::new();
    client.read_to_end(&mut rest).expect("等待服务端关闭");
    assert!(rest.is_empty(), "服务端不应回复任何字节");
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn malformed_request_can_still_be_answered() {
    let group = RpcGroup::new();
    let (addr, server) = serve(&group, |mut channel| {
        let mut request = OpRequest::default();
        match channel.receive(&mut request) {
            Err(RpcError::MalformedRequest { ticket, source }) => {
                assert!(matches!(source, WireError::Codec { .. }));
                channel
                    .transmit(ticket, &StatusResponse { status: 400 })
                    .expect("回复失败");
            }
            other => panic!("expected malformed request, got {other:?}"),
        }
    });

    let endpoint: RpcEndpoint<RawMessage, StatusResponse> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let response = endpoint
        .issue_request(RawMessage::default(), StatusResponse::default())
        .expect("发起失败")
        .wait()
        .expect("等待失败");
    assert_eq!(response.status, 400);
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn undecodable_response_fails_only_its_handle() {
    let group = RpcGroup::new();
    let (addr, server) = serve(&group, |mut channel| {
        let mut request = RawMessage::default();
        let bad = channel.receive(&mut request).expect("接收失败");
        channel
            .transmit(bad, &RawMessage::new(&b"xy"[..]))
            .expect("回复失败");
        let good = channel.receive(&mut request).expect("接收失败");
        channel
            .transmit(good, &StatusResponse { status: 7 })
            .expect("回复失败");
    });

    let endpoint: RpcEndpoint<RawMessage, StatusResponse> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let err = endpoint
        .issue_request(RawMessage::default(), StatusResponse::default())
        .expect("发起失败")
        .wait()
        .expect_err("2 字节无法解码为状态码");
    assert!(matches!(err, RpcError::Wire(WireError::Codec { .. })));
    assert!(!err.is_connection_fatal());

    let response = endpoint
        .issue_request(RawMessage::default(), StatusResponse::default())
        .expect("发起失败")
        .wait()
        .expect("连接仍可用");
    assert_eq!(response.status, 7);
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn encode_failure_keeps_connection_usable() {
    let group = RpcGroup::new().with_message_size(32);
    let (addr, server) = serve(&group, echo_until_closed);

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let err = endpoint
        .issue_request(RawMessage::new(vec![0u8; 100]), RawMessage::default())
        .expect_err("超出帧容量");
    assert!(matches!(
        err,
        RpcError::Wire(WireError::FrameTooLarge {
            required: 112,
            capacity: 32
        })
    ));

    let response = endpoint
        .issue_request(RawMessage::new(&b"fits"[..]), RawMessage::default())
        .expect("发起失败")
        .wait()
        .expect("等待失败");
    assert_eq!(response.payload().as_ref(), b"fits");
    endpoint.close().expect("关闭失败");
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn depth_one_pool_serves_two_concurrent_callers() {
    let group = RpcGroup::new().with_queue_depth(1);
    let (addr, server) = serve(&group, echo_until_closed);

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    let callers: Vec<_> = [&b"left"[..], &b"right"[..]]
        .into_iter()
        .map(|body| {
            let endpoint = endpoint.clone();
            thread::spawn(move || {
                for _ in 0..20 {
                    let response = endpoint
                        .issue_request(RawMessage::new(body), RawMessage::default())
                        .expect("发起失败")
                        .wait()
                        .expect("等待失败");
                    assert_eq!(response.payload().as_ref(), body);
                }
            })
        })
        .collect();

    for caller in callers {
        caller.join().expect("发起线程不应 panic");
    }
    endpoint.close().expect("关闭失败");
    server.join().expect("服务端线程不应 panic");
}

#[test]
fn server_try_receive_does_not_block_on_idle_connection() {
    let group = RpcGroup::new();
    let (ready, wait_ready) = mpsc::channel::<()>();
    let (addr, server) = serve(&group, move |mut channel| {
        let mut request = RawMessage::default();
        assert_eq!(channel.try_receive(&mut request).expect("空闲不是错误"), None);
        ready.send(()).expect("客户端仍在");
        let ticket = loop {
            if let Some(ticket) = channel.try_receive(&mut request).expect("接收失败") {
                break ticket;
            }
            thread::sleep(Duration::from_millis(1));
        };
        channel.transmit(ticket, &request).expect("回复失败");
        assert!(matches!(
            channel.receive(&mut request),
            Err(RpcError::Closed(CloseReason::PeerClosed))
        ));
    });

    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");
    wait_ready.recv().expect("服务端完成空闲探测");
    let response = endpoint
        .issue_request(RawMessage::new(&b"poke"[..]), RawMessage::default())
        .expect("发起失败")
        .wait()
        .expect("等待失败");
    assert_eq!(response.payload().as_ref(), b"poke");
    endpoint.close().expect("关闭失败");
    server.join().expect("服务端线程不应 panic");
}

/// 接近 1 MiB 的帧无法一次写完，写方在部分写入期间需要推进读路径；
/// 多个线程先连续发起、再统一等待，验证大帧交错下每个请求都拿回自己的负载。
#[test]
fn large_frames_from_concurrent_issuers_survive_partial_writes() {
    const WORKERS: usize = 3;
    const REQUESTS: usize = 4;
    let group = RpcGroup::new().with_queue_depth(4).with_message_size(1 << 20);
    let (addr, server) = serve(&group, echo_until_closed);
    let endpoint: RpcEndpoint<RawMessage, RawMessage> =
        RpcEndpoint::connect(&group, addr).expect("建连失败");

    let (done, finished) = mpsc::channel::<()>();
    let driver = {
        let endpoint = endpoint.clone();
        let max_payload = group.max_payload();
        thread::spawn(move || {
            let workers: Vec<_> = (0..WORKERS)
                .map(|worker| {
                    let endpoint = endpoint.clone();
                    thread::spawn(move || {
                        let handles: Vec<_> = (0..REQUESTS)
                            .map(|seq| {
                                let len = max_payload - worker * 4096 - seq * 7;
                                let body: Vec<u8> = (0..len)
                                    .map(|i| (worker * 31 + seq * 7 + i) as u8)
                                    .collect();
                                let handle = endpoint
                                    .issue_request(
                                        RawMessage::new(body.clone()),
                                        RawMessage::default(),
                                    )
                                    .expect("发起失败");
                                (handle, body)
                            })
                            .collect();
                        for (handle, body) in handles {
                            let response = handle.wait().expect("等待失败");
                            assert_eq!(response.payload().len(), body.len());
                            assert!(response.payload().as_ref() == body.as_slice(), "负载被串扰");
                        }
                    })
                })
                .collect();
            for worker in workers {
                worker.join().expect("发起线程不应 panic");
            }
            let _ = done.send(());
        })
    };

    if let Err(mpsc::RecvTimeoutError::Timeout) = finished.recv_timeout(Duration::from_secs(60)) {
        panic!("大帧并发收发在 60 秒内未完成");
    }
    driver.join().expect("驱动线程不应 panic");
    assert_eq!(endpoint.pending_requests(), 0);
    endpoint.close().expect("关闭失败");
    server.join().expect("服务端线程不应 panic");
}
