//! TCP engine tests.
//!
//! Covers: header codec, checksum gate, sequence arithmetic, the handshake,
//! in-order/duplicate/gap data, passive close, active close, simultaneous
//! close, TIME_WAIT retransmitted FIN, and RST handling.

use ethmq_lib::testing::TestResult;
use ethmq_lib::{assert_eq_test, assert_some, assert_test, fail, pass};

use crate::socket::{Socket, SocketHandle, SocketTable};
use crate::tcp::{
    self, DEFAULT_WINDOW_SIZE, TCP_HEADER_LEN, TCP_PAYLOAD_OFF, TcpFlags, TcpHeader, TcpInputResult,
    TcpResponse, TcpState,
};
use crate::testutil::{LOCAL_IP, LOCAL_MAC, PEER_IP, PEER_MAC, segment_from_peer};
use crate::types::{IpProtocol, Port, SockAddr};

const LOCAL_PORT: Port = Port(0xC001);
const ISS: u32 = 1000;
const PEER_SEQ: u32 = 5000;

fn handle() -> SocketHandle {
    let mut table = SocketTable::new();
    table
        .open(IpProtocol::Tcp, SockAddr::new(PEER_IP, Port::MQTT), 0)
        .unwrap()
}

/// Session whose handshake completed with `ISS` and `PEER_SEQ`.
fn session(state: TcpState) -> Socket {
    Socket {
        protocol: IpProtocol::Tcp,
        remote_mac: Some(PEER_MAC),
        remote_ip: PEER_IP,
        local_port: LOCAL_PORT,
        remote_port: Port::MQTT,
        state,
        iss: ISS,
        seq: ISS + 1,
        ack: PEER_SEQ + 1,
        timer: None,
        retries: 0,
    }
}

fn header(seq_num: u32, ack_num: u32, flags: TcpFlags) -> TcpHeader {
    TcpHeader {
        src_port: Port::MQTT,
        dst_port: LOCAL_PORT,
        seq_num,
        ack_num,
        data_offset: 5,
        flags,
        window_size: 1500,
    }
}

// =============================================================================
// 1. Codec
// =============================================================================

pub fn test_tcp_header_roundtrip() -> TestResult {
    let hdr = TcpHeader {
        window_size: DEFAULT_WINDOW_SIZE,
        ..header(0x0102_0304, 0x0a0b_0c0d, TcpFlags::PSH | TcpFlags::ACK)
    };
    let mut buf = [0u8; TCP_HEADER_LEN];
    assert_eq_test!(tcp::write_header(&hdr, &mut buf), Some(TCP_HEADER_LEN));
    assert_eq_test!(&buf[4..8], &[1u8, 2, 3, 4][..], "seq big-endian");
    assert_eq_test!(buf[12], 0x50, "data offset");
    assert_eq_test!(buf[13], 0x18, "PSH|ACK");
    let parsed = assert_some!(tcp::parse_header(&buf));
    assert_eq_test!(parsed, hdr);
    pass!()
}

pub fn test_tcp_parse_rejects_short_and_bad_offset() -> TestResult {
    assert_test!(tcp::parse_header(&[0u8; 19]).is_none(), "19 bytes");
    let mut buf = [0u8; TCP_HEADER_LEN];
    buf[12] = 4 << 4;
    assert_test!(tcp::parse_header(&buf).is_none(), "offset 4");
    buf[12] = 6 << 4;
    assert_test!(tcp::parse_header(&buf).is_none(), "offset beyond buffer");
    pass!()
}

pub fn test_tcp_checksum_gate() -> TestResult {
    let frame = segment_from_peer(Port::MQTT, LOCAL_PORT, 7, 9, TcpFlags::ACK, b"data");
    assert_test!(tcp::is_tcp(&frame), "built segment validates");
    let seg = assert_some!(tcp::parse_segment(&frame));
    assert_eq_test!(seg.payload_len(), 4);
    assert_eq_test!(&frame[seg.payload.clone()], &b"data"[..]);
    assert_test!(tcp::is_mqtt(&seg), "from port 1883");

    let mut corrupt = frame.clone();
    let last = corrupt.len() - 1;
    corrupt[last] ^= 0x01;
    assert_test!(!tcp::is_tcp(&corrupt), "flipped payload bit must fail");
    pass!()
}

pub fn test_tcp_emit_syn_twice_keeps_seq() -> TestResult {
    let mut sock = session(TcpState::SynSent);
    sock.seq = ISS;
    let mut frame = [0u8; 128];
    for _ in 0..2 {
        let len = tcp::emit_segment(&mut frame, (LOCAL_MAC, LOCAL_IP), &mut sock, TcpFlags::SYN, 0);
        let hdr = assert_some!(tcp::parse_header(&frame[34..len]));
        assert_eq_test!(hdr.seq_num, ISS, "SYN always carries the ISS");
        assert_eq_test!(sock.seq, ISS + 1, "SYN consumes one sequence number");
    }
    pass!()
}

pub fn test_tcp_emit_payload_advances_seq() -> TestResult {
    let mut sock = session(TcpState::Established);
    let mut frame = [0u8; 256];
    frame[TCP_PAYLOAD_OFF..TCP_PAYLOAD_OFF + 3].copy_from_slice(b"abc");
    let len = tcp::emit_segment(
        &mut frame,
        (LOCAL_MAC, LOCAL_IP),
        &mut sock,
        TcpFlags::PSH | TcpFlags::ACK,
        3,
    );
    assert_eq_test!(len, TCP_PAYLOAD_OFF + 3);
    let seg = assert_some!(tcp::parse_segment(&frame[..len]));
    assert_eq_test!(seg.hdr.seq_num, ISS + 1);
    assert_eq_test!(seg.hdr.ack_num, PEER_SEQ + 1);
    assert_eq_test!(sock.seq, ISS + 4);
    pass!()
}

pub fn test_tcp_sequence_compare_wraps() -> TestResult {
    assert_test!(tcp::seq_lt(0xffff_fff0, 0x10), "wrap lt");
    assert_test!(tcp::seq_gt(0x10, 0xffff_fff0), "wrap gt");
    assert_test!(!tcp::seq_lt(5, 5), "equal");
    pass!()
}

// =============================================================================
// 2. Handshake
// =============================================================================

pub fn test_tcp_syn_ack_establishes() -> TestResult {
    let mut sock = session(TcpState::SynSent);
    sock.seq = ISS + 1;
    sock.ack = 0;
    let hdr = header(PEER_SEQ, ISS + 1, TcpFlags::SYN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 0);
    assert_eq_test!(result.new_state, Some(TcpState::Established));
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_eq_test!(sock.ack, PEER_SEQ + 1, "ack = peer seq + 1");
    assert_eq_test!(sock.seq, ISS + 1);
    pass!()
}

pub fn test_tcp_syn_ack_wrong_ack_ignored() -> TestResult {
    let mut sock = session(TcpState::SynSent);
    let hdr = header(PEER_SEQ, ISS + 7, TcpFlags::SYN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 0);
    assert_eq_test!(result, TcpInputResult::default());
    assert_eq_test!(sock.state, TcpState::SynSent);
    pass!()
}

pub fn test_tcp_repeated_syn_ack_reacked() -> TestResult {
    let mut sock = session(TcpState::Established);
    let hdr = header(PEER_SEQ, ISS + 1, TcpFlags::SYN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 0);
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_eq_test!(result.new_state, None);
    assert_eq_test!(sock.ack, PEER_SEQ + 1, "ack unchanged");
    assert_eq_test!(sock.seq, ISS + 1);

    // A SYN at or beyond the expected byte is not a retransmission.
    let stray = header(sock.ack + 10, ISS + 1, TcpFlags::SYN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &stray, 0);
    assert_eq_test!(result, TcpInputResult::default());
    pass!()
}

pub fn test_tcp_rst_ack_refuses() -> TestResult {
    let mut sock = session(TcpState::SynSent);
    let hdr = header(0, ISS + 1, TcpFlags::RST | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 0);
    assert_test!(result.refused && result.release, "refused and released");
    assert_eq_test!(sock.state, TcpState::Closed);

    let mut sock = session(TcpState::SynSent);
    let bare = header(0, 0, TcpFlags::RST);
    if tcp::tcp_input(&mut sock, handle(), &bare, 0).refused {
        return fail!("RST without ACK must not refuse a SYN");
    }
    pass!()
}

// =============================================================================
// 3. Data
// =============================================================================

pub fn test_tcp_in_order_data_counted_once() -> TestResult {
    let mut sock = session(TcpState::Established);
    let before = sock.ack;
    let hdr = header(before, ISS + 1, TcpFlags::PSH | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 10);
    assert_test!(result.deliver, "in-order data delivered");
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_eq_test!(sock.ack, before + 10);

    // Same segment again (peer missed our ACK): re-ACK, no double count.
    let again = tcp::tcp_input(&mut sock, handle(), &hdr, 10);
    assert_test!(!again.deliver, "duplicate not delivered");
    assert_eq_test!(again.response, Some(TcpResponse::Ack));
    assert_eq_test!(sock.ack, before + 10, "ack unchanged by duplicate");
    pass!()
}

pub fn test_tcp_gap_dropped() -> TestResult {
    let mut sock = session(TcpState::Established);
    let hdr = header(sock.ack + 100, ISS + 1, TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 5);
    assert_test!(!result.deliver, "out of order not delivered");
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_eq_test!(sock.ack, PEER_SEQ + 1);
    pass!()
}

pub fn test_tcp_pure_ack_is_silent() -> TestResult {
    let mut sock = session(TcpState::Established);
    let hdr = header(sock.ack, ISS + 1, TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &hdr, 0);
    assert_eq_test!(result.response, None);
    assert_eq_test!(result.new_state, None);
    pass!()
}

// =============================================================================
// 4. Teardown
// =============================================================================

pub fn test_tcp_passive_close() -> TestResult {
    let mut sock = session(TcpState::Established);
    let fin = header(sock.ack, ISS + 1, TcpFlags::FIN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &fin, 0);
    assert_eq_test!(result.new_state, Some(TcpState::CloseWait));
    assert_eq_test!(result.response, Some(TcpResponse::FinAck));
    assert_eq_test!(sock.ack, PEER_SEQ + 2, "FIN takes one sequence number");

    // Our FIN|ACK goes out and LAST_ACK waits for its ACK.
    sock.state = TcpState::LastAck;
    sock.seq += 1;
    let ack = header(PEER_SEQ + 2, sock.seq, TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &ack, 0);
    assert_test!(result.release, "LAST_ACK released");
    pass!()
}

pub fn test_tcp_active_close() -> TestResult {
    let mut sock = session(TcpState::Established);
    let mut frame = [0u8; 128];
    tcp::emit_segment(
        &mut frame,
        (LOCAL_MAC, LOCAL_IP),
        &mut sock,
        TcpFlags::FIN | TcpFlags::ACK,
        0,
    );
    sock.state = TcpState::FinWait1;
    assert_eq_test!(sock.seq, ISS + 2);

    let ack = header(sock.ack, sock.seq, TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &ack, 0);
    assert_eq_test!(result.new_state, Some(TcpState::FinWait2));

    let fin = header(sock.ack, sock.seq, TcpFlags::FIN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &fin, 0);
    assert_eq_test!(result.new_state, Some(TcpState::TimeWait));
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_eq_test!(sock.ack, PEER_SEQ + 2);
    pass!()
}

pub fn test_tcp_fin_ack_in_fin_wait_1() -> TestResult {
    let mut sock = session(TcpState::FinWait1);
    sock.seq = ISS + 2;
    let fin = header(sock.ack, ISS + 2, TcpFlags::FIN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &fin, 0);
    assert_eq_test!(result.new_state, Some(TcpState::TimeWait));
    pass!()
}

pub fn test_tcp_simultaneous_close() -> TestResult {
    let mut sock = session(TcpState::FinWait1);
    sock.seq = ISS + 2;
    // Peer's FIN crossed ours: it still acknowledges only our SYN.
    let fin = header(sock.ack, ISS + 1, TcpFlags::FIN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &fin, 0);
    assert_eq_test!(result.new_state, Some(TcpState::Closing));
    assert_eq_test!(result.response, Some(TcpResponse::Ack));

    let ack = header(sock.ack, ISS + 2, TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &ack, 0);
    assert_eq_test!(result.new_state, Some(TcpState::TimeWait));
    assert_test!(!result.release, "CLOSING lingers in TIME_WAIT");
    pass!()
}

pub fn test_tcp_time_wait_retransmitted_fin() -> TestResult {
    let mut sock = session(TcpState::TimeWait);
    let fin = header(PEER_SEQ, ISS + 2, TcpFlags::FIN | TcpFlags::ACK);
    let result = tcp::tcp_input(&mut sock, handle(), &fin, 0);
    assert_eq_test!(result.response, Some(TcpResponse::Ack));
    assert_test!(result.restart_timer, "timer restarted");
    assert_eq_test!(sock.state, TcpState::TimeWait);
    pass!()
}

// =============================================================================
// 5. RST
// =============================================================================

pub fn test_tcp_rst_in_established_restarts() -> TestResult {
    let mut sock = session(TcpState::Established);
    let rst = header(sock.ack, 0, TcpFlags::RST);
    let result = tcp::tcp_input(&mut sock, handle(), &rst, 0);
    assert_test!(result.reset, "reset requested");
    assert_test!(!result.release, "slot kept for the new handshake");
    assert_eq_test!(sock.state, TcpState::SynSent);
    pass!()
}

pub fn test_tcp_rst_while_closing_releases() -> TestResult {
    for state in [TcpState::FinWait2, TcpState::CloseWait, TcpState::TimeWait] {
        let mut sock = session(state);
        let rst = header(sock.ack, 0, TcpFlags::RST);
        let result = tcp::tcp_input(&mut sock, handle(), &rst, 0);
        assert_test!(result.release, "RST in {} releases", state.name());
    }
    pass!()
}

ethmq_lib::define_test_suite!(
    tcp,
    [
        test_tcp_header_roundtrip,
        test_tcp_parse_rejects_short_and_bad_offset,
        test_tcp_checksum_gate,
        test_tcp_emit_syn_twice_keeps_seq,
        test_tcp_emit_payload_advances_seq,
        test_tcp_sequence_compare_wraps,
        test_tcp_syn_ack_establishes,
        test_tcp_syn_ack_wrong_ack_ignored,
        test_tcp_repeated_syn_ack_reacked,
        test_tcp_rst_ack_refuses,
        test_tcp_in_order_data_counted_once,
        test_tcp_gap_dropped,
        test_tcp_pure_ack_is_silent,
        test_tcp_passive_close,
        test_tcp_active_close,
        test_tcp_fin_ack_in_fin_wait_1,
        test_tcp_simultaneous_close,
        test_tcp_time_wait_retransmitted_fin,
        test_tcp_rst_in_established_restarts,
        test_tcp_rst_while_closing_releases,
    ]
);
