use std::io::Read;
use std::net::{TcpListener, UdpSocket};
use std::thread;
use std::time::Duration;

use dualping::client::{Client, Config};
use dualping::packet::{ProbePacket, PACKET_SIZE};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn start_client(config: Config) {
    let mut client = Client::new(config).expect("failed to create dualping client");

    thread::spawn(move || {
        let _ = client.run();
    });
}

#[test]
fn probes_flow_on_both_transports() {
    // A bare-bones stand-in server: a listener and a datagram socket
    // sharing one port, neither of which echoes anything.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let udp = UdpSocket::bind(addr).unwrap();
    udp.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    start_client(Config {
        server_addr: addr,
        probe_interval_ms: 50,
        probe_timeout_ms: 200,
        report_path: None,
    });

    // Datagram probes arrive unconditionally, sequence increasing.
    let mut buf = [0u8; 64];
    let (n, _) = udp.recv_from(&mut buf).unwrap();
    assert_eq!(n, PACKET_SIZE);
    let first = ProbePacket::read(&buf[..n]).unwrap();

    let (n, _) = udp.recv_from(&mut buf).unwrap();
    let second = ProbePacket::read(&buf[..n]).unwrap();

    assert_eq!(second.seq, first.seq.wrapping_add(1));
    assert!(second.send_time >= first.send_time);

    // The stream connects and carries probes once established.
    let (mut stream, _) = listener.accept().unwrap();
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    let mut frame = [0u8; PACKET_SIZE];
    stream.read_exact(&mut frame).unwrap();
    assert!(ProbePacket::read(&frame).is_some());

    let mut next = [0u8; PACKET_SIZE];
    stream.read_exact(&mut next).unwrap();
    let a = ProbePacket::read(&frame).unwrap();
    let b = ProbePacket::read(&next).unwrap();
    assert_eq!(b.seq, a.seq.wrapping_add(1));
}

#[test]
fn datagram_probing_survives_stream_refusal() {
    // Only the datagram half of the endpoint exists; stream connects are
    // refused. Datagram probes must keep flowing regardless.
    let udp = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = udp.local_addr().unwrap();
    udp.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    start_client(Config {
        server_addr: addr,
        probe_interval_ms: 50,
        probe_timeout_ms: 200,
        report_path: None,
    });

    let mut buf = [0u8; 64];
    let (n, _) = udp.recv_from(&mut buf).unwrap();
    assert_eq!(n, PACKET_SIZE);

    let (n, _) = udp.recv_from(&mut buf).unwrap();
    assert!(ProbePacket::read(&buf[..n]).is_some());
}
