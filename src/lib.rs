/*

dualping measures end-to-end liveness and quality toward a single server over
two transports at once: an ordered TCP byte stream and best-effort UDP
datagrams. Comparing the two windows apart loss and jitter introduced by the
path itself from loss that only a connection-oriented transport recovers.

# Probe accounting

Each transport is driven by an independent `Pinger`. A probe carries a
sequence number and the sender's monotonic send tick; the server echoes it
back unmodified, and the sender computes the round trip against its own
clock. Outstanding probes live in an ordered window of acknowledged flags,
oldest first. The window is trimmed lazily at send time: once a slot's age
(position times the probe interval) reaches the timeout, it is popped, and a
pop of an unacknowledged slot counts one lost packet. An echo that refers to
a sequence number outside the window, or to a slot already acknowledged, is
ignored, which also rejects duplicated and forged echoes.

# Scheduling

Everything is driven by a single thread running one mio poll loop. The only
scheduling primitive is a periodic tick, implemented as the poll timeout:
100 ms on the client, 1 s on the server. Client ticks advance the reconnect
state machine, ask both pingers for due probes, and flush the once-a-minute
statistics report. Server ticks only sweep the session table; all echo work
happens on readiness events.

The TCP side of the client is a three-state machine (not connected,
connecting, connected) with a fixed 10 s retry backoff. A stream socket that
failed or saw EOF is discarded and a fresh one is created for the next
attempt. The UDP side has no connection concept; probes are always sent.

*/

pub mod client;
mod epoch;
pub mod logger;
pub mod packet;
pub mod pinger;
pub mod report;
pub mod server;

pub type Client = client::Client;
pub type Server = server::Server;
