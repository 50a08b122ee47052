use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::thread;
use std::time::Duration;

use dualping::packet::{ProbePacket, PACKET_SIZE};
use dualping::server::{Config, Server};

const IO_TIMEOUT: Duration = Duration::from_secs(5);

fn start_server(config: Config) -> SocketAddr {
    let mut server = Server::bind_with_config("127.0.0.1:0".parse().unwrap(), config)
        .expect("failed to bind dualping server");

    let addr = server.local_addr().expect("failed to read server address");

    thread::spawn(move || {
        let _ = server.run();
    });

    addr
}

#[test]
fn stream_probes_are_echoed() {
    let addr = start_server(Default::default());

    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    for seq in 0..3u32 {
        let probe = ProbePacket {
            seq,
            send_time: 1000 + u64::from(seq),
        };

        let mut frame = [0u8; PACKET_SIZE];
        probe.write(&mut frame);
        stream.write_all(&frame).expect("failed to write probe");

        let mut echoed = [0u8; PACKET_SIZE];
        stream.read_exact(&mut echoed).expect("failed to read echo");

        assert_eq!(ProbePacket::read(&echoed), Some(probe));
    }
}

#[test]
fn datagrams_are_echoed_to_their_sender() {
    let addr = start_server(Default::default());

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    let probe = ProbePacket {
        seq: 42,
        send_time: 777,
    };
    let mut frame = [0u8; PACKET_SIZE];
    probe.write(&mut frame);

    socket.send_to(&frame, addr).expect("failed to send probe");

    let mut echoed = [0u8; 64];
    let (n, from) = socket.recv_from(&mut echoed).expect("failed to read echo");

    assert_eq!(from, addr);
    assert_eq!(n, PACKET_SIZE);
    assert_eq!(ProbePacket::read(&echoed[..n]), Some(probe));
}

#[test]
fn datagram_echo_preserves_arbitrary_payloads() {
    // The server relays datagram bytes without interpreting them.
    let addr = start_server(Default::default());

    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    let payload = b"not a probe at all";
    socket.send_to(payload, addr).unwrap();

    let mut echoed = [0u8; 64];
    let (n, _) = socket.recv_from(&mut echoed).unwrap();

    assert_eq!(&echoed[..n], payload);
}

#[test]
fn idle_sessions_are_closed() {
    let addr = start_server(Config {
        idle_timeout_ms: 300,
    });

    let mut stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_read_timeout(Some(IO_TIMEOUT)).unwrap();

    let probe = ProbePacket {
        seq: 0,
        send_time: 0,
    };
    let mut frame = [0u8; PACKET_SIZE];
    probe.write(&mut frame);
    stream.write_all(&frame).unwrap();

    let mut echoed = [0u8; PACKET_SIZE];
    stream.read_exact(&mut echoed).unwrap();

    // Then go quiet. The next scan past the threshold closes the session,
    // which surfaces here as EOF well within the read timeout.
    let mut buf = [0u8; PACKET_SIZE];
    match stream.read(&mut buf) {
        Ok(0) => {}
        other => panic!("expected EOF from reaped session, got {:?}", other),
    }
}
