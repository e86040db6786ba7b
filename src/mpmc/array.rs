use std::{collections::VecDeque, sync::Arc};

use super::{
    context::{unbox, Context, Payload, Registration, Selected, Side},
    errors::{illegal_state, RecvError, SendError, TrySendError},
    lock::{Guard, Locked, Shared},
    waker::{Entry, Port, Waker},
};

/// The result of a receive: `ok == true` carries a sent value, `ok == false`
/// means the channel is closed and drained and `value` is its terminal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received<T> {
    pub value: Option<T>,
    pub ok: bool,
}

impl<T> Received<T> {
    pub(crate) fn value(msg: T) -> Self {
        Received {
            value: Some(msg),
            ok: true,
        }
    }

    pub(crate) fn closed(terminal: Option<T>) -> Self {
        Received {
            value: terminal,
            ok: false,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Received<U> {
        Received {
            value: self.value.map(f),
            ok: self.ok,
        }
    }

    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

// 关闭后交给所有接收者的终止值
pub(crate) type Terminal<T> = Box<dyn Fn() -> T + Send>;

// channel实体
struct State<T> {
    // 环形缓冲区，长度不超过cap，只计入缓冲的信息
    buf: VecDeque<T>,
    // 等待配对接收方的sender
    senders: Waker,
    // 等待配对发送方的receiver
    receivers: Waker,
    // 单调的，一旦为true就不再改变
    closed: bool,
    terminal: Option<Terminal<T>>,
}

impl<T> State<T> {
    fn terminal(&self) -> Option<T> {
        self.terminal.as_ref().map(|make| make())
    }

    // 缓冲区里有积压并且有接收者在等待
    fn backlog_for_receiver(&mut self) -> Option<(Entry, T)> {
        if self.buf.is_empty() {
            return None;
        }
        let entry = self.receivers.pop()?;
        let msg = self.buf.pop_front()?;
        Some((entry, msg))
    }

    // 缓冲区有空位时，队头的sender可以把信息搬进来
    // 关闭之后不再接受等待中的sender的信息
    fn sender_for_free_slot(&mut self, cap: usize) -> Option<Entry> {
        if self.closed || self.buf.len() >= cap {
            return None;
        }
        self.senders.pop()
    }
}

// 有界channel，cap为0时是纯粹的rendezvous channel
pub(crate) struct Channel<T> {
    shared: Arc<Shared>,
    cap: usize,
    state: Locked<State<T>>,
}

impl<T: Send + 'static> Channel<T> {
    pub(crate) fn new(shared: Arc<Shared>, cap: usize) -> Self {
        let state = Locked::new(
            shared.id(),
            State {
                buf: VecDeque::with_capacity(cap),
                senders: Waker::new(),
                receivers: Waker::new(),
                closed: false,
                terminal: None,
            },
        );
        Channel { shared, cap, state }
    }

    #[inline]
    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.shared
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.cap
    }

    // 尝试将msg写入channel(non-blocking)
    pub(crate) fn try_send(&self, g: &mut Guard<'_>, msg: T) -> Result<(), TrySendError<T>> {
        // 关闭优先于任何配对，即使有接收者在等待
        if self.state.get(g).closed {
            return Err(TrySendError::Closed(msg));
        }

        // 先把缓冲区里的积压按顺序交给已经在等待的接收者，新的msg不能插队
        while let Some((entry, old)) = self.state.get(g).backlog_for_receiver() {
            entry.deliver(g, old);
        }

        // 直接交给等待最久的接收者
        if let Some(entry) = self.state.get(g).receivers.pop() {
            entry.deliver(g, msg);
            return Ok(());
        }

        let st = self.state.get(g);
        if st.buf.len() < self.cap {
            st.buf.push_back(msg);
            return Ok(());
        }
        Err(TrySendError::Full(msg))
    }

    // 尝试从channel接收(non-blocking)，None代表会阻塞
    pub(crate) fn try_recv(&self, g: &mut Guard<'_>) -> Option<Received<T>> {
        let st = self.state.get(g);
        let mut msg = st.buf.pop_front();
        let closed = st.closed;

        // 缓冲区为空时直接从等待最久的sender手里拿
        if msg.is_none() && !closed {
            if let Some(entry) = self.state.get(g).senders.pop() {
                msg = Some(entry.take(g));
            }
        }

        // 把等待中的sender搬进腾出来的空位
        while let Some(entry) = self.state.get(g).sender_for_free_slot(self.cap) {
            let moved = entry.take(g);
            self.state.get(g).buf.push_back(moved);
        }

        match msg {
            Some(msg) => Some(Received::value(msg)),
            None if closed => Some(Received::closed(self.state.get(g).terminal())),
            None => None,
        }
    }

    // 向channel发送msg，直到被接收/缓冲，或者channel关闭、线程被中断
    pub(crate) fn send(self: &Arc<Self>, msg: T) -> Result<(), SendError<T>> {
        let cx = Context::current(&self.shared);
        let mut g = self.shared.lock();
        let mut msg = msg;

        loop {
            msg = match self.try_send(&mut g, msg) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Closed(msg)) => return Err(SendError::Closed(msg)),
                Err(TrySendError::Full(msg)) => msg,
            };

            // 准备阻塞直到一个receiver唤醒我们
            let port: Arc<dyn Port> = self.clone();
            cx.register(&mut g, vec![Registration::send(Some(port), Box::new(msg))], 0);

            match cx.park(&mut g) {
                Selected::Operation { .. } => {
                    cx.clear(&mut g);
                    return Ok(());
                }
                // 回到循环开头，关闭检查会让这次发送失败
                Selected::Closed => msg = reclaim(cx.take_registrations(&mut g)),
                Selected::Interrupted => {
                    let msg = reclaim(cx.take_registrations(&mut g));
                    return Err(SendError::Interrupted(msg));
                }
                Selected::Waiting => illegal_state("sender woke without an outcome"),
            }
        }
    }

    // 接收一个msg，channel关闭且没有数据后返回终止值
    pub(crate) fn recv(self: &Arc<Self>) -> Result<Received<T>, RecvError> {
        let cx = Context::current(&self.shared);
        let mut g = self.shared.lock();

        loop {
            if let Some(received) = self.try_recv(&mut g) {
                return Ok(received);
            }

            let port: Arc<dyn Port> = self.clone();
            cx.register(&mut g, vec![Registration::receive(Some(port))], 0);

            match cx.park(&mut g) {
                Selected::Operation { data, .. } => {
                    cx.clear(&mut g);
                    return match data {
                        Some(payload) => Ok(Received::value(unbox(payload))),
                        None => illegal_state("receiver resolved without a message"),
                    };
                }
                Selected::Closed => cx.clear(&mut g),
                Selected::Interrupted => {
                    cx.clear(&mut g);
                    return Err(RecvError::Interrupted);
                }
                Selected::Waiting => illegal_state("receiver woke without an outcome"),
            }
        }
    }

    // 关闭channel并唤醒所有阻塞的senders和receivers
    // 如果是这次调用关闭了channel，返回true
    pub(crate) fn close(&self, terminal: Option<Terminal<T>>) -> bool {
        let mut g = self.shared.lock();
        let st = self.state.get(&mut g);
        if st.closed {
            return false;
        }
        st.closed = true;
        st.terminal = terminal;

        let mut parked = st.senders.disconnect();
        parked.extend(st.receivers.disconnect());
        log::debug!(
            "channel closed with {} buffered, waking {} parked context(s)",
            st.buf.len(),
            parked.len()
        );
        for cx in parked {
            cx.wake_closed(&mut g);
        }
        true
    }

    pub(crate) fn len(&self) -> usize {
        let mut g = self.shared.lock();
        self.state.get(&mut g).buf.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        let mut g = self.shared.lock();
        self.state.get(&mut g).closed
    }

    // (阻塞的sender数, 阻塞的receiver数)
    #[cfg(test)]
    pub(crate) fn parked(&self) -> (usize, usize) {
        let mut g = self.shared.lock();
        let st = self.state.get(&mut g);
        (st.senders.len(), st.receivers.len())
    }
}

fn reclaim<T: 'static>(regs: Vec<Registration>) -> T {
    match regs.into_iter().next().and_then(Registration::into_payload) {
        Some(payload) => unbox(payload),
        None => illegal_state("parked send lost its message"),
    }
}

impl<T: Send + 'static> Port for Channel<T> {
    fn runtime_id(&self) -> u64 {
        self.shared.id()
    }

    fn try_send_erased(&self, g: &mut Guard<'_>, payload: Payload) -> Result<(), TrySendError<Payload>> {
        self.try_send(g, unbox::<T>(payload))
            .map_err(|err| err.map(|msg| Box::new(msg) as Payload))
    }

    fn try_receive_erased(&self, g: &mut Guard<'_>) -> Option<Received<Payload>> {
        self.try_recv(g)
            .map(|received| received.map(|msg| Box::new(msg) as Payload))
    }

    fn park(&self, g: &mut Guard<'_>, cx: &Arc<Context>, slot: usize, side: Side) {
        let st = self.state.get(g);
        match side {
            Side::Send => st.senders.register(cx, slot),
            Side::Receive => st.receivers.register(cx, slot),
        }
    }

    fn unpark(&self, g: &mut Guard<'_>, cx: &Context, slot: usize, side: Side) -> bool {
        let st = self.state.get(g);
        let entry = match side {
            Side::Send => st.senders.unregister(cx, slot),
            Side::Receive => st.receivers.unregister(cx, slot),
        };
        entry.is_some()
    }
}
