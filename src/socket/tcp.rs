use core::{cmp, fmt, mem};

use crate::config::{
    TCP_DEFAULT_MSS, TCP_FAST_RTX_DUP_ACKS, TCP_MAX_RTO, TCP_MIN_RTO, TCP_MSL,
};
use crate::iface::InterfaceInner;
use crate::socket::PollAt;
use crate::storage::{Assembler, RingBuffer};
use crate::time::{Duration, Instant};
use crate::wire::{
    IpEndpoint, IpListenEndpoint, IpRepr, TcpControl, TcpRepr, TcpSeqNumber as SeqNumber,
    IPV4_HEADER_LEN, TCP_HEADER_LEN,
};

mod congestion;

const RTTE_INITIAL_RTO: u32 = 1000;
const ACK_DELAY_DEFAULT: Duration = Duration::from_millis(10);
const DEFAULT_MSS: usize = TCP_DEFAULT_MSS;
/// Minimum spacing between challenge ACKs sent for unacceptable segments on an
/// established connection (RFC 5961 §3.2), so a blind off-path attacker can't
/// use them as an oracle.
const CHALLENGE_ACK_INTERVAL: Duration = Duration::from_secs(1);

/// A TCP connection state, as defined in RFC 793 §3.2.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum State {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            State::Closed => "CLOSED",
            State::Listen => "LISTEN",
            State::SynSent => "SYN-SENT",
            State::SynReceived => "SYN-RECEIVED",
            State::Established => "ESTABLISHED",
            State::FinWait1 => "FIN-WAIT-1",
            State::FinWait2 => "FIN-WAIT-2",
            State::CloseWait => "CLOSE-WAIT",
            State::Closing => "CLOSING",
            State::LastAck => "LAST-ACK",
            State::TimeWait => "TIME-WAIT",
        };
        write!(f, "{s}")
    }
}

enum Timer {
    Idle { keep_alive_at: Option<Instant> },
    Retransmit { expires_at: Instant },
    FastRetransmit,
    Close { expires_at: Instant },
}

impl Timer {
    fn new() -> Timer {
        Timer::Idle { keep_alive_at: None }
    }

    fn should_keep_alive(&self, timestamp: Instant) -> bool {
        matches!(*self, Timer::Idle { keep_alive_at: Some(at) } if timestamp >= at)
    }

    fn should_retransmit(&self, timestamp: Instant) -> bool {
        match *self {
            Timer::Retransmit { expires_at } => timestamp >= expires_at,
            Timer::FastRetransmit => true,
            _ => false,
        }
    }

    fn should_close(&self, timestamp: Instant) -> bool {
        matches!(*self, Timer::Close { expires_at } if timestamp >= expires_at)
    }

    fn poll_at(&self) -> PollAt {
        match *self {
            Timer::Idle { keep_alive_at: Some(at) } => PollAt::Time(at),
            Timer::Idle { keep_alive_at: None } => PollAt::Ingress,
            Timer::Retransmit { expires_at } => PollAt::Time(expires_at),
            Timer::FastRetransmit => PollAt::Now,
            Timer::Close { expires_at } => PollAt::Time(expires_at),
        }
    }

    fn set_for_idle(&mut self, timestamp: Instant, interval: Option<Duration>) {
        *self = Timer::Idle {
            keep_alive_at: interval.map(|i| timestamp + i),
        };
    }

    fn set_keep_alive(&mut self) {
        if let Timer::Idle { keep_alive_at } = self {
            if keep_alive_at.is_none() {
                *keep_alive_at = Some(Instant::ZERO);
            }
        }
    }

    fn rewind_keep_alive(&mut self, timestamp: Instant, interval: Option<Duration>) {
        if let Timer::Idle { keep_alive_at } = self {
            *keep_alive_at = interval.map(|i| timestamp + i);
        }
    }

    fn set_for_retransmit(&mut self, timestamp: Instant, delay: Duration) {
        if !matches!(*self, Timer::Close { .. }) {
            *self = Timer::Retransmit {
                expires_at: timestamp + delay,
            };
        }
    }

    fn set_for_fast_retransmit(&mut self) {
        *self = Timer::FastRetransmit;
    }

    fn set_for_close(&mut self, timestamp: Instant) {
        *self = Timer::Close {
            expires_at: timestamp + TCP_MSL * 2,
        };
    }
}

/// Jacobson/Karels RTT estimator with integer fixed-point arithmetic.
struct RttEstimator {
    have_measurement: bool,
    srtt: u32,
    rttvar: u32,
    rto: u32,
    timestamp: Option<(Instant, SeqNumber)>,
    max_seq_sent: Option<SeqNumber>,
    rto_count: u8,
}

impl RttEstimator {
    fn new() -> Self {
        RttEstimator {
            have_measurement: false,
            srtt: RTTE_INITIAL_RTO,
            rttvar: RTTE_INITIAL_RTO / 2,
            rto: RTTE_INITIAL_RTO,
            timestamp: None,
            max_seq_sent: None,
            rto_count: 0,
        }
    }

    fn retransmission_timeout(&self) -> Duration {
        Duration::from_millis(self.rto as u64).clamp(TCP_MIN_RTO, TCP_MAX_RTO)
    }

    fn sample(&mut self, measurement: u32) {
        let measurement = measurement.max(1);
        if self.have_measurement {
            let diff = (self.srtt as i32 - measurement as i32).unsigned_abs();
            self.rttvar = (3 * self.rttvar + diff) / 4;
            self.srtt = (7 * self.srtt + measurement) / 8;
        } else {
            self.srtt = measurement;
            self.rttvar = measurement / 2;
            self.have_measurement = true;
        }
        self.rto = self.srtt + 4 * self.rttvar.max(1);
        self.rto_count = 0;
    }

    fn on_send(&mut self, timestamp: Instant, seq: SeqNumber) {
        if self.max_seq_sent.map_or(true, |max| seq > max) {
            self.max_seq_sent = Some(seq);
            if self.timestamp.is_none() {
                self.timestamp = Some((timestamp, seq));
            }
        }
    }

    fn on_ack(&mut self, timestamp: Instant, seq: SeqNumber) {
        if let Some((sent_at, sent_seq)) = self.timestamp {
            if seq >= sent_seq {
                self.sample((timestamp - sent_at).total_millis() as u32);
                self.timestamp = None;
            }
        }
    }

    fn on_retransmit(&mut self) {
        self.timestamp = None;
        self.rto_count = self.rto_count.saturating_add(1);
        if self.rto_count >= 3 {
            self.rto = self.rto.saturating_mul(2).min(TCP_MAX_RTO.total_millis() as u32);
        }
    }
}

struct Tuple {
    local: IpEndpoint,
    remote: IpEndpoint,
}

enum AckDelayTimer {
    Idle,
    Waiting(Instant),
    Immediate,
}

pub type SocketBuffer<'a> = RingBuffer<'a, u8>;

/// Error returned by [`Socket::listen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenError {
    Unaddressable,
    InvalidState,
}

/// Error returned by [`Socket::connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectError {
    Unaddressable,
    InvalidState,
}

/// Error returned by [`Socket::send_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    InvalidState,
}

/// Error returned by [`Socket::recv_slice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    InvalidState,
    Finished,
}

/// A Transmission Control Protocol socket.
///
/// A socket starts in [`State::Closed`]; [`listen`](Socket::listen) moves it to
/// [`State::Listen`], [`connect`](Socket::connect) performs an active open. There is
/// no separate listener/PCB split: a listening socket turns into the one connection
/// it accepts. A server that wants to accept several connections at once keeps
/// several `Socket`s, each listening on the same port, in the same
/// [`SocketSet`](crate::iface::SocketSet) — the way a `smoltcp`-lineage stack does it.
pub struct Socket<'a> {
    state: State,
    timer: Timer,
    rtte: RttEstimator,
    assembler: Assembler,
    rx_buffer: SocketBuffer<'a>,
    rx_fin_received: bool,
    tx_buffer: SocketBuffer<'a>,
    timeout: Option<Duration>,
    keep_alive: Option<Duration>,
    hop_limit: Option<u8>,

    listen_endpoint: IpListenEndpoint,
    tuple: Option<Tuple>,

    local_seq_no: SeqNumber,
    remote_seq_no: SeqNumber,
    remote_last_seq: SeqNumber,
    remote_last_win: u16,
    remote_win_shift: u8,
    remote_win_len: usize,
    remote_win_scale: Option<u8>,
    remote_mss: usize,

    local_rx_dup_acks: u8,

    ack_delay: Option<Duration>,
    ack_delay_timer: AckDelayTimer,
    challenge_ack_timer: Instant,
    nagle: bool,

    congestion_controller: congestion::AnyController,
}

impl<'a> Socket<'a> {
    /// Create a TCP socket with the given buffers.
    pub fn new<T>(rx_buffer: T, tx_buffer: T) -> Socket<'a>
    where
        T: Into<SocketBuffer<'a>>,
    {
        let rx_buffer = rx_buffer.into();
        let tx_buffer = tx_buffer.into();
        assert!(
            rx_buffer.capacity() < (1 << 30),
            "receive buffer too large, would overflow the TCP window"
        );

        let rx_cap_log2 =
            mem::size_of::<usize>() as u8 * 8 - (rx_buffer.capacity().max(1)).leading_zeros() as u8;

        Socket {
            state: State::Closed,
            timer: Timer::new(),
            rtte: RttEstimator::new(),
            assembler: Assembler::new(),
            rx_buffer,
            rx_fin_received: false,
            tx_buffer,
            timeout: None,
            keep_alive: None,
            hop_limit: None,

            listen_endpoint: IpListenEndpoint::default(),
            tuple: None,

            local_seq_no: SeqNumber::default(),
            remote_seq_no: SeqNumber::default(),
            remote_last_seq: SeqNumber::default(),
            remote_last_win: 0,
            remote_win_shift: rx_cap_log2.saturating_sub(16),
            remote_win_len: 0,
            remote_win_scale: None,
            remote_mss: DEFAULT_MSS,

            local_rx_dup_acks: 0,

            ack_delay: Some(ACK_DELAY_DEFAULT),
            ack_delay_timer: AckDelayTimer::Idle,
            challenge_ack_timer: Instant::ZERO,
            nagle: true,

            congestion_controller: congestion::AnyController::new(),
        }
    }

    fn set_state(&mut self, state: State) {
        if self.state != state {
            net_trace!("tcp: state {} -> {}", self.state, state);
        }
        self.state = state;
    }

    /// Start listening for an incoming connection on `endpoint`.
    pub fn listen<T: Into<IpListenEndpoint>>(&mut self, endpoint: T) -> Result<(), ListenError> {
        if self.state != State::Closed {
            return Err(ListenError::InvalidState);
        }
        let endpoint = endpoint.into();
        if endpoint.port == 0 {
            return Err(ListenError::Unaddressable);
        }
        self.listen_endpoint = endpoint;
        self.set_state(State::Listen);
        Ok(())
    }

    /// Begin an active open to `remote`, from `local`.
    pub fn connect<T, U>(&mut self, cx: &mut InterfaceInner, remote: U, local: T) -> Result<(), ConnectError>
    where
        T: Into<IpListenEndpoint>,
        U: Into<IpEndpoint>,
    {
        if self.state != State::Closed {
            return Err(ConnectError::InvalidState);
        }
        let remote = remote.into();
        if remote.port == 0 || remote.addr.is_unspecified() {
            return Err(ConnectError::Unaddressable);
        }
        let local = local.into();

        let local_addr = match local.addr.or_else(|| cx.get_source_address(&remote.addr)) {
            Some(addr) => addr,
            None => return Err(ConnectError::Unaddressable),
        };
        let local_port = if local.port != 0 {
            local.port
        } else {
            cx.rand()
                .rand_source_port(crate::config::EPHEMERAL_PORT_FIRST, crate::config::EPHEMERAL_PORT_LAST)
        };

        self.reset();
        self.tuple = Some(Tuple {
            local: IpEndpoint::new(local_addr, local_port),
            remote,
        });
        self.local_seq_no = SeqNumber(cx.rand().rand_u32() as i32);
        self.set_state(State::SynSent);
        self.rtte.on_send(cx.now(), self.local_seq_no);
        Ok(())
    }

    /// Reset to the closed state, discarding all connection state and buffered data.
    fn reset(&mut self) {
        self.state = State::Closed;
        self.timer = Timer::new();
        self.rtte = RttEstimator::new();
        self.assembler = Assembler::new();
        self.rx_buffer.clear();
        self.rx_fin_received = false;
        self.tx_buffer.clear();
        self.tuple = None;
        self.local_seq_no = SeqNumber::default();
        self.remote_seq_no = SeqNumber::default();
        self.remote_last_seq = SeqNumber::default();
        self.remote_last_win = 0;
        self.remote_win_len = 0;
        self.remote_win_scale = None;
        self.remote_mss = DEFAULT_MSS;
        self.local_rx_dup_acks = 0;
        self.ack_delay_timer = AckDelayTimer::Idle;
        self.congestion_controller = congestion::AnyController::new();
    }

    /// Close the sending half of the connection (send a FIN once all queued data is sent).
    pub fn close(&mut self) {
        match self.state {
            State::Closed | State::Listen | State::SynSent => self.set_state(State::Closed),
            State::SynReceived | State::Established => self.set_state(State::FinWait1),
            State::CloseWait => self.set_state(State::LastAck),
            State::FinWait1 | State::FinWait2 | State::Closing | State::LastAck | State::TimeWait => {}
        }
    }

    /// Forcibly close the connection, discarding data and sending an RST if necessary.
    pub fn abort(&mut self) {
        self.reset();
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn set_timeout(&mut self, duration: Option<Duration>) {
        self.timeout = duration;
    }

    pub fn set_keep_alive(&mut self, interval: Option<Duration>) {
        self.keep_alive = interval;
        if interval.is_some() {
            self.timer.set_keep_alive();
        }
    }

    pub fn set_hop_limit(&mut self, hop_limit: Option<u8>) {
        self.hop_limit = hop_limit;
    }

    pub fn set_ack_delay(&mut self, delay: Option<Duration>) {
        self.ack_delay = delay;
    }

    pub fn set_nagle_enabled(&mut self, enabled: bool) {
        self.nagle = enabled;
    }

    pub fn nagle_enabled(&self) -> bool {
        self.nagle
    }

    pub fn local_endpoint(&self) -> Option<IpEndpoint> {
        self.tuple.as_ref().map(|t| t.local)
    }

    pub fn remote_endpoint(&self) -> Option<IpEndpoint> {
        self.tuple.as_ref().map(|t| t.remote)
    }

    pub fn is_open(&self) -> bool {
        self.state != State::Closed
    }

    pub fn is_active(&self) -> bool {
        !matches!(self.state, State::Closed | State::TimeWait)
    }

    pub fn is_listening(&self) -> bool {
        self.state == State::Listen
    }

    /// Whether the connection is established enough that the application may still
    /// enqueue data to send.
    pub fn may_send(&self) -> bool {
        matches!(self.state, State::Established | State::CloseWait)
    }

    /// Whether the peer may still have unread data coming (we haven't seen its FIN).
    pub fn may_recv(&self) -> bool {
        match self.state {
            State::Established | State::FinWait1 | State::FinWait2 => true,
            // Even past our own FIN, data the peer queued before its FIN is still readable.
            State::CloseWait | State::Closing | State::LastAck | State::TimeWait => {
                !self.rx_buffer.is_empty()
            }
            _ => false,
        }
    }

    pub fn can_send(&self) -> bool {
        self.may_send() && !self.tx_buffer.is_full()
    }

    pub fn can_recv(&self) -> bool {
        !self.rx_buffer.is_empty()
    }

    pub fn send_capacity(&self) -> usize {
        self.tx_buffer.capacity()
    }

    pub fn recv_capacity(&self) -> usize {
        self.rx_buffer.capacity()
    }

    /// Enqueue data to be sent, returning the number of bytes actually queued.
    pub fn send_slice(&mut self, data: &[u8]) -> Result<usize, SendError> {
        if !self.may_send() {
            return Err(SendError::InvalidState);
        }
        Ok(self.tx_buffer.enqueue_slice(data))
    }

    /// Dequeue up to `data.len()` bytes of received data.
    pub fn recv_slice(&mut self, data: &mut [u8]) -> Result<usize, RecvError> {
        if self.rx_buffer.is_empty() {
            if self.rx_fin_received {
                return Err(RecvError::Finished);
            }
            if !self.may_recv() {
                return Err(RecvError::InvalidState);
            }
        }
        let n = self.rx_buffer.dequeue_slice(data);
        self.assembler.remove_front(n);
        Ok(n)
    }

    fn send_mss(&self) -> usize {
        self.remote_mss
    }

    /// Shrink the effective MSS in response to a reported path MTU, if it's
    /// smaller than what we're currently using. Never grows `remote_mss`
    /// back up on its own; a larger MTU is only adopted again through
    /// renegotiation (a fresh SYN exchange).
    pub(crate) fn pmtu_update(&mut self, new_mtu: usize) {
        let mss = new_mtu.saturating_sub(IPV4_HEADER_LEN + TCP_HEADER_LEN);
        if mss < self.remote_mss {
            self.remote_mss = mss;
            self.congestion_controller.set_mss(mss);
        }
    }

    fn scaled_window(&self) -> u16 {
        let window = self.rx_buffer.window() >> self.remote_win_shift;
        cmp::min(window, u16::MAX as usize) as u16
    }

    pub(crate) fn accepts(&self, _cx: &mut InterfaceInner, ip_repr: &IpRepr, repr: &TcpRepr) -> bool {
        match self.state {
            State::Closed => false,
            State::Listen => {
                repr.dst_port == self.listen_endpoint.port
                    && self
                        .listen_endpoint
                        .addr
                        .map_or(true, |addr| addr == ip_repr.dst_addr())
            }
            _ => match &self.tuple {
                Some(t) => {
                    t.local.addr == ip_repr.dst_addr()
                        && t.local.port == repr.dst_port
                        && t.remote.addr == ip_repr.src_addr()
                        && t.remote.port == repr.src_port
                }
                None => false,
            },
        }
    }

    /// Process one incoming segment already addressed to this socket, returning an
    /// immediate reply (an RST or challenge ACK) if one is warranted.
    pub(crate) fn process(
        &mut self,
        cx: &mut InterfaceInner,
        ip_repr: &IpRepr,
        repr: &TcpRepr,
    ) -> Option<(IpRepr, TcpRepr<'static>)> {
        let src_addr = ip_repr.src_addr();
        let dst_addr = ip_repr.dst_addr();

        if self.state == State::Listen {
            // Only a bare SYN can create a new connection out of a listening socket.
            if repr.control != TcpControl::Syn || repr.ack_number.is_some() {
                if repr.control == TcpControl::Rst {
                    return None;
                }
                return Some(self.rst_reply(ip_repr, repr));
            }

            self.tuple = Some(Tuple {
                local: IpEndpoint::new(dst_addr, repr.dst_port),
                remote: IpEndpoint::new(src_addr, repr.src_port),
            });
            self.remote_seq_no = repr.seq_number + 1;
            self.remote_last_seq = self.remote_seq_no;
            self.apply_peer_handshake_options(repr);

            self.local_seq_no = SeqNumber(cx.rand().rand_u32() as i32);
            self.rtte = RttEstimator::new();
            self.rtte.on_send(cx.now(), self.local_seq_no);
            self.set_state(State::SynReceived);
            self.timer.set_for_retransmit(cx.now(), self.rtte.retransmission_timeout());
            return None;
        }

        if self.state == State::SynSent {
            if let Some(ack) = repr.ack_number {
                let acceptable = ack > self.local_seq_no - 1 && ack <= self.local_seq_no;
                if !acceptable {
                    if repr.control != TcpControl::Rst {
                        return Some(self.rst_reply(ip_repr, repr));
                    }
                    return None;
                }
            }
            if repr.control == TcpControl::Rst {
                if repr.ack_number.is_some() {
                    self.reset();
                }
                return None;
            }
            if repr.control == TcpControl::Syn {
                self.remote_seq_no = repr.seq_number + 1;
                self.remote_last_seq = self.remote_seq_no;
                self.apply_peer_handshake_options(repr);
                self.rtte.on_ack(cx.now(), self.local_seq_no);

                if repr.ack_number.is_some() {
                    self.set_state(State::Established);
                    self.timer.set_for_idle(cx.now(), self.keep_alive);
                } else {
                    // Simultaneous open: both sides sent a SYN before seeing the other's.
                    self.set_state(State::SynReceived);
                    self.timer.set_for_retransmit(cx.now(), self.rtte.retransmission_timeout());
                }
                self.ack_delay_timer = AckDelayTimer::Immediate;
            }
            return None;
        }

        // Every other state has an established connection tuple.
        if repr.control == TcpControl::Rst {
            let acceptable = repr.seq_number == self.remote_last_seq
                || (repr.seq_number >= self.remote_seq_no
                    && (repr.seq_number - self.remote_seq_no) < self.remote_win_len.max(1));
            if acceptable {
                net_trace!("tcp: connection reset by peer");
                self.reset();
            }
            return None;
        }

        // A retransmitted SYN (peer never saw our SYN-ACK): just re-ack, don't restart.
        if repr.control == TcpControl::Syn {
            return Some(self.ack_reply(ip_repr, repr));
        }

        if self.state == State::SynReceived {
            match repr.ack_number {
                Some(ack) if ack == self.local_seq_no + 1 => {
                    self.rtte.on_ack(cx.now(), self.local_seq_no);
                    self.local_seq_no += 1;
                    self.set_state(State::Established);
                    self.timer.set_for_idle(cx.now(), self.keep_alive);
                }
                _ => return Some(self.rst_reply(ip_repr, repr)),
            }
        }

        let window_end = self.remote_seq_no + self.rx_buffer.capacity().max(1);
        let in_window = repr.seq_number >= self.remote_seq_no && repr.seq_number <= window_end;
        if !in_window && (!repr.payload.is_empty() || repr.control == TcpControl::Fin) {
            if cx.now() >= self.challenge_ack_timer {
                self.challenge_ack_timer = cx.now() + CHALLENGE_ACK_INTERVAL;
                return Some(self.ack_reply(ip_repr, repr));
            }
            return None;
        }

        if let Some(ack_number) = repr.ack_number {
            let unacked = self.local_seq_no;
            if ack_number > unacked {
                let acked = (ack_number - unacked).min(self.tx_buffer.len());
                self.tx_buffer.dequeue_allocated(acked);
                self.local_seq_no = ack_number;
                self.rtte.on_ack(cx.now(), ack_number);
                self.congestion_controller.on_ack(acked);
                self.local_rx_dup_acks = 0;
                if self.tx_buffer.is_empty() {
                    self.timer.set_for_idle(cx.now(), self.keep_alive);
                } else {
                    self.timer.set_for_retransmit(cx.now(), self.rtte.retransmission_timeout());
                }
            } else if ack_number == unacked
                && repr.payload.is_empty()
                && repr.control == TcpControl::None
                && !self.tx_buffer.is_empty()
                && repr.window_len == self.remote_last_win
            {
                self.local_rx_dup_acks = self.local_rx_dup_acks.saturating_add(1);
                if self.local_rx_dup_acks == TCP_FAST_RTX_DUP_ACKS {
                    self.congestion_controller.on_duplicate_ack();
                    self.timer.set_for_fast_retransmit();
                }
            }
            self.remote_last_win = repr.window_len;
            self.remote_win_len = (repr.window_len as usize) << self.remote_win_scale.unwrap_or(0);
        }

        let mut ack_needed = false;
        if !repr.payload.is_empty() || repr.control == TcpControl::Fin {
            // Trim any already-delivered prefix rather than panicking on the
            // wraparound-aware subtraction below.
            let mut payload = repr.payload;
            let mut seq = repr.seq_number;
            if seq < self.remote_seq_no {
                let trim = self.remote_seq_no - seq;
                payload = if trim >= payload.len() { &[] } else { &payload[trim..] };
                seq = self.remote_seq_no;
            }
            let offset = (seq - self.remote_seq_no) as usize;

            if offset == 0 {
                if !payload.is_empty() {
                    self.rx_buffer.enqueue_slice(payload);
                    self.remote_seq_no += payload.len();
                    self.assembler.remove_front(payload.len());
                }
                // Splice in any out-of-order data that is now contiguous.
                loop {
                    let avail = self.assembler.peek_front();
                    if avail == 0 {
                        break;
                    }
                    self.rx_buffer.enqueue_unallocated(avail);
                    self.remote_seq_no += avail;
                    self.assembler.remove_front(avail);
                }
            } else if !payload.is_empty() {
                let buf_offset = self.rx_buffer.len() + offset;
                let written = self.rx_buffer.write_unallocated(buf_offset, payload);
                if written > 0 {
                    let _ = self.assembler.add(self.rx_buffer.len() + offset, written);
                }
            }

            if repr.control == TcpControl::Fin && seq + payload.len() == self.remote_seq_no {
                self.remote_seq_no += 1;
                self.rx_fin_received = true;
                match self.state {
                    State::Established => self.set_state(State::CloseWait),
                    State::FinWait1 => self.set_state(State::Closing),
                    State::FinWait2 => {
                        self.set_state(State::TimeWait);
                        self.timer.set_for_close(cx.now());
                    }
                    _ => {}
                }
            }
            ack_needed = true;
        }

        match (self.state, repr.ack_number) {
            (State::Closing, Some(ack)) if ack == self.local_seq_no => {
                self.set_state(State::TimeWait);
                self.timer.set_for_close(cx.now());
            }
            (State::LastAck, Some(ack)) if ack == self.local_seq_no => {
                self.reset();
                return None;
            }
            _ => {}
        }

        if ack_needed {
            self.ack_delay_timer = match (self.ack_delay, self.ack_delay_timer) {
                (Some(delay), AckDelayTimer::Idle) if !repr.payload.is_empty() => {
                    AckDelayTimer::Waiting(cx.now() + delay)
                }
                (_, current @ AckDelayTimer::Waiting(_)) if !repr.payload.is_empty() => current,
                _ => AckDelayTimer::Immediate,
            };
        }

        None
    }

    fn apply_peer_handshake_options(&mut self, repr: &TcpRepr) {
        self.remote_mss = repr
            .max_seg_size
            .map(|mss| mss as usize)
            .unwrap_or(DEFAULT_MSS)
            .max(1);
        self.remote_win_scale = repr.window_scale;
        if self.remote_win_scale.is_none() {
            self.remote_win_shift = 0;
        }
        self.remote_win_len = (repr.window_len as usize) << self.remote_win_scale.unwrap_or(0);
        self.congestion_controller.set_mss(self.remote_mss);
    }

    fn rst_reply(&self, ip_repr: &IpRepr, repr: &TcpRepr) -> (IpRepr, TcpRepr<'static>) {
        let (seq, ack) = match repr.ack_number {
            Some(ack) => (ack, None),
            None => (SeqNumber(0), Some(repr.seq_number + repr.segment_len())),
        };
        let reply = TcpRepr {
            src_port: repr.dst_port,
            dst_port: repr.src_port,
            control: TcpControl::Rst,
            seq_number: seq,
            ack_number: ack,
            window_len: 0,
            window_scale: None,
            max_seg_size: None,
            payload: &[],
        };
        let ip = IpRepr::new(
            ip_repr.dst_addr(),
            ip_repr.src_addr(),
            crate::wire::IpProtocol::Tcp,
            reply.buffer_len(),
            64,
        );
        (ip, reply)
    }

    fn ack_reply(&self, ip_repr: &IpRepr, repr: &TcpRepr) -> (IpRepr, TcpRepr<'static>) {
        let reply = TcpRepr {
            src_port: repr.dst_port,
            dst_port: repr.src_port,
            control: TcpControl::None,
            seq_number: self.local_seq_no,
            ack_number: Some(self.remote_seq_no),
            window_len: self.scaled_window(),
            window_scale: None,
            max_seg_size: None,
            payload: &[],
        };
        let ip = IpRepr::new(
            ip_repr.dst_addr(),
            ip_repr.src_addr(),
            crate::wire::IpProtocol::Tcp,
            reply.buffer_len(),
            self.hop_limit.unwrap_or(64),
        );
        (ip, reply)
    }

    /// Produce the next outgoing segment, if any is due: a handshake segment, queued
    /// data, a pending ACK, a retransmission, or a FIN.
    pub(crate) fn dispatch<F, E>(&mut self, cx: &mut InterfaceInner, mut emit: F) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, (IpRepr, TcpRepr)) -> Result<(), E>,
    {
        let (local, remote) = match &self.tuple {
            Some(t) => (t.local, t.remote),
            None => return Ok(()),
        };

        if self.timer.should_retransmit(cx.now()) {
            self.rtte.on_retransmit();
            self.congestion_controller.on_retransmit();
            self.timer.set_for_retransmit(cx.now(), self.rtte.retransmission_timeout());
        }

        if self.timer.should_close(cx.now()) {
            self.reset();
            return Ok(());
        }

        if self.timer.should_keep_alive(cx.now()) {
            self.timer.rewind_keep_alive(cx.now(), self.keep_alive);
            let repr = TcpRepr {
                src_port: local.port,
                dst_port: remote.port,
                control: TcpControl::None,
                seq_number: self.local_seq_no - 1,
                ack_number: Some(self.remote_seq_no),
                window_len: self.scaled_window(),
                window_scale: None,
                max_seg_size: None,
                payload: &[],
            };
            return self.emit_segment(cx, local, remote, repr, emit);
        }

        match self.state {
            State::SynSent | State::SynReceived => {
                let repr = TcpRepr {
                    src_port: local.port,
                    dst_port: remote.port,
                    control: TcpControl::Syn,
                    seq_number: self.local_seq_no,
                    ack_number: (self.state == State::SynReceived).then_some(self.remote_seq_no),
                    window_len: self.scaled_window(),
                    window_scale: Some(self.remote_win_shift),
                    max_seg_size: Some(DEFAULT_MSS as u16),
                    payload: &[],
                };
                return self.emit_segment(cx, local, remote, repr, emit);
            }
            State::Closed => return Ok(()),
            _ => {}
        }

        let ack_due = match self.ack_delay_timer {
            AckDelayTimer::Immediate => true,
            AckDelayTimer::Waiting(at) => cx.now() >= at,
            AckDelayTimer::Idle => false,
        };

        let win = cmp::min(self.remote_win_len, self.congestion_controller.window());
        let sendable = self.tx_buffer.len();
        let can_send_now = sendable > 0 && win > 0;
        let fin_pending =
            matches!(self.state, State::FinWait1 | State::Closing | State::LastAck) && sendable == 0;

        if !can_send_now && !fin_pending && !ack_due {
            return Ok(());
        }

        let seq_number = self.local_seq_no;
        let len = if can_send_now {
            cmp::min(sendable, cmp::min(win, self.send_mss()))
        } else {
            0
        };
        let control = if fin_pending && len == sendable {
            TcpControl::Fin
        } else {
            TcpControl::None
        };

        if len > 0 {
            self.rtte.on_send(cx.now(), seq_number + len);
        }
        if control == TcpControl::Fin {
            self.local_seq_no += 1;
        }
        self.ack_delay_timer = AckDelayTimer::Idle;
        if len > 0 || control == TcpControl::Fin {
            self.timer.set_for_retransmit(cx.now(), self.rtte.retransmission_timeout());
        }

        let data = self.tx_buffer.get_allocated(0, len);
        let repr = TcpRepr {
            src_port: local.port,
            dst_port: remote.port,
            control,
            seq_number,
            ack_number: Some(self.remote_seq_no),
            window_len: self.scaled_window(),
            window_scale: None,
            max_seg_size: None,
            payload: data,
        };
        self.emit_segment(cx, local, remote, repr, emit)
    }

    fn emit_segment<F, E>(
        &self,
        cx: &mut InterfaceInner,
        local: IpEndpoint,
        remote: IpEndpoint,
        repr: TcpRepr,
        mut emit: F,
    ) -> Result<(), E>
    where
        F: FnMut(&mut InterfaceInner, (IpRepr, TcpRepr)) -> Result<(), E>,
    {
        let ip_repr = IpRepr::new(
            local.addr,
            remote.addr,
            crate::wire::IpProtocol::Tcp,
            repr.buffer_len(),
            self.hop_limit.unwrap_or(64),
        );
        emit(cx, (ip_repr, repr))
    }

    pub(crate) fn poll_at(&self, _cx: &mut InterfaceInner) -> PollAt {
        if self.tuple.is_none() {
            return PollAt::Ingress;
        }
        let ack_at = match self.ack_delay_timer {
            AckDelayTimer::Immediate => PollAt::Now,
            AckDelayTimer::Waiting(at) => PollAt::Time(at),
            AckDelayTimer::Idle => PollAt::Ingress,
        };
        let data_at = if !self.tx_buffer.is_empty() {
            PollAt::Now
        } else {
            PollAt::Ingress
        };
        [ack_at, data_at, self.timer.poll_at()]
            .into_iter()
            .min_by_key(|p| match p {
                PollAt::Now => i64::MIN,
                PollAt::Time(t) => t.total_millis(),
                PollAt::Ingress => i64::MAX,
            })
            .unwrap_or(PollAt::Ingress)
    }
}

impl<'a> fmt::Debug for Socket<'a> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("tcp::Socket")
            .field("state", &self.state)
            .field("tuple", &self.tuple.as_ref().map(|t| (t.local, t.remote)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::{Config, Interface};
    use crate::phy::{Loopback, Medium};
    use crate::wire::{EthernetAddress, HardwareAddress, IpAddress, IpCidr, Ipv4Address};

    fn localhost() -> IpAddress {
        IpAddress::Ipv4(Ipv4Address::new(127, 0, 0, 1))
    }

    fn inner() -> (Interface, Loopback) {
        let mut device = Loopback::new(Medium::Ethernet);
        let config = Config::new(HardwareAddress::Ethernet(EthernetAddress([0, 0, 0, 0, 0, 1])));
        let mut iface = Interface::new(config, &mut device, Instant::ZERO);
        iface.update_ip_addrs(|addrs| {
            addrs.push(IpCidr::new(localhost(), 8)).unwrap();
        });
        (iface, device)
    }

    fn socket() -> Socket<'static> {
        Socket::new(SocketBuffer::new(vec![0; 1024]), SocketBuffer::new(vec![0; 1024]))
    }

    #[test]
    fn new_socket_is_closed() {
        let s = socket();
        assert_eq!(s.state(), State::Closed);
        assert!(!s.is_active());
    }

    #[test]
    fn listen_requires_closed_state() {
        let mut s = socket();
        s.listen(80).unwrap();
        assert_eq!(s.listen(81), Err(ListenError::InvalidState));
    }

    #[test]
    fn listen_rejects_port_zero() {
        let mut s = socket();
        assert_eq!(s.listen(0), Err(ListenError::Unaddressable));
    }

    #[test]
    fn connect_requires_nonzero_remote_port() {
        let (mut iface, _dev) = inner();
        let mut s = socket();
        let remote = IpEndpoint::new(localhost(), 0);
        assert_eq!(s.connect(iface.context(), remote, 0), Err(ConnectError::Unaddressable));
    }

    #[test]
    fn connect_assigns_local_tuple_and_moves_to_syn_sent() {
        let (mut iface, _dev) = inner();
        let mut s = socket();
        let remote = IpEndpoint::new(localhost(), 80);
        s.connect(iface.context(), remote, 49500).unwrap();
        assert_eq!(s.state(), State::SynSent);
        assert_eq!(s.local_endpoint().unwrap().port, 49500);
        assert_eq!(s.remote_endpoint().unwrap(), remote);
    }

    #[test]
    fn close_before_established_just_closes() {
        let mut s = socket();
        s.listen(80).unwrap();
        s.close();
        assert_eq!(s.state(), State::Closed);
    }

    #[test]
    fn pmtu_update_shrinks_mss_when_smaller() {
        let mut s = socket();
        let before = s.send_mss();
        s.pmtu_update(200);
        assert!(s.send_mss() < before);
    }

    #[test]
    fn pmtu_update_never_grows_mss() {
        let mut s = socket();
        s.pmtu_update(200);
        let shrunk = s.send_mss();
        s.pmtu_update(9000);
        assert_eq!(s.send_mss(), shrunk);
    }

    #[test]
    fn abort_resets_to_closed_from_any_state() {
        let (mut iface, _dev) = inner();
        let mut s = socket();
        s.connect(iface.context(), IpEndpoint::new(localhost(), 80), 0).unwrap();
        s.abort();
        assert_eq!(s.state(), State::Closed);
        assert!(s.local_endpoint().is_none());
    }

    #[test]
    fn send_slice_rejected_before_established() {
        let mut s = socket();
        assert_eq!(s.send_slice(b"hi"), Err(SendError::InvalidState));
    }

    #[test]
    fn listen_socket_accepts_matching_syn_and_creates_tuple() {
        let (mut iface, _dev) = inner();
        let mut s = socket();
        s.listen(80).unwrap();

        let syn = TcpRepr {
            src_port: 49500,
            dst_port: 80,
            control: TcpControl::Syn,
            seq_number: SeqNumber(1000),
            ack_number: None,
            window_len: 4096,
            window_scale: None,
            max_seg_size: Some(1400),
            payload: &[],
        };
        let ip_repr = IpRepr::new(localhost(), localhost(), crate::wire::IpProtocol::Tcp, syn.buffer_len(), 64);
        assert!(s.accepts(iface.context(), &ip_repr, &syn));
        let reply = s.process(iface.context(), &ip_repr, &syn);
        assert_eq!(s.state(), State::SynReceived);
        assert!(reply.is_none());
        assert!(s.remote_endpoint().is_some());
    }

    #[test]
    fn unacceptable_rst_in_syn_sent_is_ignored() {
        let (mut iface, _dev) = inner();
        let mut s = socket();
        s.connect(iface.context(), IpEndpoint::new(localhost(), 80), 49500).unwrap();
        let rst = TcpRepr {
            src_port: 80,
            dst_port: 49500,
            control: TcpControl::Rst,
            seq_number: SeqNumber(1),
            ack_number: None,
            window_len: 0,
            window_scale: None,
            max_seg_size: None,
            payload: &[],
        };
        let ip_repr = IpRepr::new(localhost(), localhost(), crate::wire::IpProtocol::Tcp, rst.buffer_len(), 64);
        assert!(s.process(iface.context(), &ip_repr, &rst).is_none());
        assert_eq!(s.state(), State::SynSent);
    }
}
