// 线程的等待上下文
use std::{
    any::Any,
    cell::RefCell,
    fmt, mem,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, ThreadId},
};

use parking_lot::Condvar;

use super::errors::illegal_state;
use super::lock::{Guard, Locked, Shared};
use super::waker::Port;

// 跨越select边界传递的信息，channel内部再还原成T
pub(crate) type Payload = Box<dyn Any + Send>;

pub(crate) fn unbox<T: 'static>(payload: Payload) -> T {
    match payload.downcast::<T>() {
        Ok(msg) => *msg,
        Err(_) => illegal_state("payload type does not match the channel"),
    }
}

// 日志里用来区分context
static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Side {
    Send,
    Receive,
}

pub(crate) enum Role {
    // 待发送的信息，被对端取走后为None
    Send(Option<Payload>),
    Receive,
}

// 登记集合中的一项：一个channel（None代表被禁用的分支）和在上面扮演的角色
pub(crate) struct Registration {
    pub(crate) port: Option<Arc<dyn Port>>,
    pub(crate) role: Role,
}

impl Registration {
    pub(crate) fn send(port: Option<Arc<dyn Port>>, payload: Payload) -> Self {
        Registration {
            port,
            role: Role::Send(Some(payload)),
        }
    }

    pub(crate) fn receive(port: Option<Arc<dyn Port>>) -> Self {
        Registration {
            port,
            role: Role::Receive,
        }
    }

    #[inline]
    pub(crate) fn side(&self) -> Side {
        match self.role {
            Role::Send(_) => Side::Send,
            Role::Receive => Side::Receive,
        }
    }

    pub(crate) fn into_payload(self) -> Option<Payload> {
        match self.role {
            Role::Send(payload) => payload,
            Role::Receive => None,
        }
    }
}

// 当前阻塞操作的状态
pub(crate) enum Selected {
    // 等待一个操作
    Waiting,
    // 某个登记的channel被关闭了，线程需要自己重新检查状态
    // 这只是一个提示，在线程重新拿到锁之前仍可能被其他channel配对
    Closed,
    // 阻塞期间被中断，只作为park的返回值出现
    Interrupted,
    // 登记集合中的第index项被配对，接收方会带上data
    Operation { index: usize, data: Option<Payload> },
}

impl fmt::Debug for Selected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selected::Waiting => f.pad("Waiting"),
            Selected::Closed => f.pad("Closed"),
            Selected::Interrupted => f.pad("Interrupted"),
            Selected::Operation { index, data } => f
                .debug_struct("Operation")
                .field("index", index)
                .field("has_data", &data.is_some())
                .finish(),
        }
    }
}

struct State {
    regs: Vec<Registration>,
    selected: Selected,
    // 粘性的中断标记，由下一次park消费
    interrupted: bool,
}

// 每个(线程, Runtime)一个上下文，在第一次使用时创建并被反复使用
pub(crate) struct Context {
    id: u64,
    runtime: Weak<Shared>,
    runtime_id: u64,
    thread: ThreadId,
    // 线程私有的条件变量，只和所属Runtime的全局锁一起使用
    cond: Condvar,
    state: Locked<State>,
}

impl Context {
    // 取得当前线程在这个Runtime上的上下文
    pub(crate) fn current(shared: &Arc<Shared>) -> Arc<Context> {
        thread_local! {
            static CONTEXTS: RefCell<Vec<Arc<Context>>> = const { RefCell::new(Vec::new()) };
        }

        CONTEXTS
            .try_with(|cell| {
                let mut contexts = cell.borrow_mut();
                // Runtime已经销毁的上下文不会再被用到
                contexts.retain(|cx| cx.runtime.strong_count() > 0);
                if let Some(cx) = contexts.iter().find(|cx| cx.runtime_id == shared.id()) {
                    return cx.clone();
                }
                let cx = Arc::new(Context::new(shared));
                contexts.push(cx.clone());
                cx
            })
            // 线程本地存储正在销毁
            .unwrap_or_else(|_| Arc::new(Context::new(shared)))
    }

    #[cold]
    fn new(shared: &Arc<Shared>) -> Context {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::trace!("context {} created for runtime {}", id, shared.id());
        Context {
            id,
            runtime: Arc::downgrade(shared),
            runtime_id: shared.id(),
            thread: thread::current().id(),
            cond: Condvar::new(),
            state: Locked::new(
                shared.id(),
                State {
                    regs: Vec::new(),
                    selected: Selected::Waiting,
                    interrupted: false,
                },
            ),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    // 把整个登记集合挂到各个channel上
    // 从start开始轮转着挂入，同一个channel出现多次时哪一项排在前面是随机的
    pub(crate) fn register(self: &Arc<Self>, g: &mut Guard<'_>, regs: Vec<Registration>, start: usize) {
        let st = self.state.get(g);
        if !st.regs.is_empty() {
            illegal_state("context is already registered");
        }
        st.selected = Selected::Waiting;

        let n = regs.len();
        let ports: Vec<(usize, Arc<dyn Port>, Side)> = (0..n)
            .map(|k| (start + k) % n)
            .filter_map(|i| regs[i].port.clone().map(|port| (i, port, regs[i].side())))
            .collect();
        st.regs = regs;

        log::trace!("context {} parks on {} channel(s)", self.id, ports.len());
        for (index, port, side) in ports {
            port.park(g, self, index, side);
        }
    }

    // 阻塞直到被配对、被关闭唤醒或被中断
    // 返回Closed或Interrupted时上下文已经从所有channel上摘除，但登记集合（以及待发送的信息）还保留着
    pub(crate) fn park(&self, g: &mut Guard<'_>) -> Selected {
        loop {
            let st = self.state.get(g);
            match mem::replace(&mut st.selected, Selected::Waiting) {
                Selected::Waiting => {
                    if st.interrupted {
                        st.interrupted = false;
                        log::debug!("context {} interrupted while parked", self.id);
                        self.detach_all(g);
                        return Selected::Interrupted;
                    }
                }
                Selected::Closed => {
                    log::trace!("context {} woken by close", self.id);
                    self.detach_all(g);
                    return Selected::Closed;
                }
                Selected::Interrupted => illegal_state("interrupt stored as an outcome"),
                op => return op,
            }
            g.wait(&self.cond);
        }
    }

    // 由赢得竞争的channel调用：第slot项被配对
    // 在释放全局锁之前把其余各项（包括同一个channel上的重复项）全部摘除
    // 如果被配对的是发送项，返回它的信息
    pub(crate) fn resolve(&self, g: &mut Guard<'_>, slot: usize, data: Option<Payload>) -> Option<Payload> {
        let st = self.state.get(g);
        if !matches!(st.selected, Selected::Waiting | Selected::Closed) {
            illegal_state("context resolved twice");
        }
        let mut regs = mem::take(&mut st.regs);
        let taken = match regs.get_mut(slot) {
            Some(reg) => match &mut reg.role {
                Role::Send(payload) => payload.take(),
                Role::Receive => None,
            },
            None => illegal_state("resolved slot is not registered"),
        };
        self.detach(g, &regs, Some(slot));

        self.state.get(g).selected = Selected::Operation { index: slot, data };
        log::trace!("context {} resolved on slot {}", self.id, slot);
        self.cond.notify_one();
        taken
    }

    // close广播：只给还在等待的上下文留下提示，登记项由线程醒来后自己摘除
    pub(crate) fn wake_closed(&self, g: &mut Guard<'_>) {
        let st = self.state.get(g);
        if matches!(st.selected, Selected::Waiting) {
            st.selected = Selected::Closed;
        }
        self.cond.notify_one();
    }

    pub(crate) fn interrupt(&self, g: &mut Guard<'_>) {
        self.state.get(g).interrupted = true;
        self.cond.notify_one();
    }

    pub(crate) fn take_interrupt(&self, g: &mut Guard<'_>) -> bool {
        mem::take(&mut self.state.get(g).interrupted)
    }

    // 取回登记集合，select用它重新扫描，send用它取回信息
    pub(crate) fn take_registrations(&self, g: &mut Guard<'_>) -> Vec<Registration> {
        let st = self.state.get(g);
        st.selected = Selected::Waiting;
        mem::take(&mut st.regs)
    }

    // 两次操作之间重置上下文
    pub(crate) fn clear(&self, g: &mut Guard<'_>) {
        let st = self.state.get(g);
        st.selected = Selected::Waiting;
        st.regs.clear();
    }

    fn detach_all(&self, g: &mut Guard<'_>) {
        let regs = mem::take(&mut self.state.get(g).regs);
        self.detach(g, &regs, None);
        self.state.get(g).regs = regs;
    }

    fn detach(&self, g: &mut Guard<'_>, regs: &[Registration], skip: Option<usize>) {
        for (index, reg) in regs.iter().enumerate() {
            if Some(index) == skip {
                continue;
            }
            if let Some(port) = &reg.port {
                if !port.unpark(g, self, index, reg.side()) {
                    illegal_state("registration missing while detaching");
                }
            }
        }
    }
}

/// A handle that interrupts the thread it was created on.
///
/// An interrupt delivered while the thread is parked in `send`, `receive` or
/// `select` detaches it from every channel and makes that call fail with an
/// interrupted error. An interrupt delivered while the thread is not parked
/// stays pending until its next park.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
    cx: Arc<Context>,
}

impl Interrupter {
    pub(crate) fn new(shared: Arc<Shared>, cx: Arc<Context>) -> Self {
        Interrupter { shared, cx }
    }

    pub fn interrupt(&self) {
        let mut g = self.shared.lock();
        log::debug!("interrupting context {}", self.cx.id());
        self.cx.interrupt(&mut g);
    }

    /// The thread this handle interrupts.
    pub fn thread(&self) -> ThreadId {
        self.cx.thread()
    }
}

impl fmt::Debug for Interrupter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupter")
            .field("thread", &self.cx.thread())
            .finish()
    }
}
