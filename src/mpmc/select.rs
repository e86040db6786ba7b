use std::{fmt, mem, sync::Arc};

use rand::{rngs::SmallRng, Rng, SeedableRng};

use super::{
    array::Received,
    context::{Context, Payload, Registration, Role, Selected},
    errors::{illegal_state, SelectError, TrySendError, UsageError},
    lock::{Guard, Shared},
    Channel,
};

/// A one-shot builder racing several send and receive branches.
///
/// Branches are numbered in the order they were added. `None` in place of a
/// channel adds a branch that can never be chosen, so a branch can be
/// disabled without renumbering the others. The branch list is consumed by
/// every `select`/`select_nonblock` call and the builder is reusable after it.
///
/// ```
/// use csp_channel::Runtime;
///
/// let rt = Runtime::new();
/// let numbers = rt.channel::<i32>(1).unwrap();
/// let names = rt.channel::<String>(1).unwrap();
/// names.send("ferris".to_string()).unwrap();
///
/// let mut select = rt.select();
/// let index = select.receive(Some(&numbers)).receive(Some(&names)).select().unwrap();
/// assert_eq!(index, 1);
/// assert_eq!(select.take_data::<String>().unwrap().as_deref(), Some("ferris"));
/// ```
pub struct Select {
    shared: Arc<Shared>,
    branches: Vec<Registration>,
    // 最近一次select在receive分支上的结果
    last: Option<Received<Payload>>,
    rng: SmallRng,
}

impl Select {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let rng = match shared.config().seed {
            Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(shared.next_select_seq())),
            None => SmallRng::from_entropy(),
        };
        Select {
            shared,
            branches: Vec::new(),
            last: None,
            rng,
        }
    }

    pub fn receive<T: Send + 'static>(&mut self, chan: Option<&Channel<T>>) -> &mut Self {
        self.branches.push(Registration::receive(chan.map(Channel::port)));
        self
    }

    pub fn send<T: Send + 'static>(&mut self, chan: Option<&Channel<T>>, msg: T) -> &mut Self {
        self.branches
            .push(Registration::send(chan.map(Channel::port), Box::new(msg)));
        self
    }

    /// Number of branches added since the last select.
    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Blocks until one branch completes and returns its index.
    ///
    /// A closed channel makes its receive branch ready with the terminal
    /// value; a send branch on a closed channel fails with
    /// [`SelectError::Closed`] once that branch is chosen. With no usable
    /// branch this blocks until the thread is interrupted.
    pub fn select(&mut self) -> Result<usize, SelectError> {
        match self.run(true)? {
            Some(index) => Ok(index),
            None => illegal_state("blocking select returned without a branch"),
        }
    }

    /// Like [`select`](Select::select) but returns `Ok(None)` instead of
    /// blocking, leaving no registration behind.
    pub fn select_nonblock(&mut self) -> Result<Option<usize>, SelectError> {
        self.run(false)
    }

    /// Takes the value delivered to the receive branch chosen by the last
    /// select: the received value, or the terminal value of a closed channel.
    /// A second call returns `Ok(None)`.
    pub fn take_data<T: 'static>(&mut self) -> Result<Option<T>, UsageError> {
        let received = self.last.as_mut().ok_or(UsageError::NoReceive)?;
        match received.value.take() {
            None => Ok(None),
            Some(payload) => match payload.downcast::<T>() {
                Ok(msg) => Ok(Some(*msg)),
                Err(payload) => {
                    received.value = Some(payload);
                    Err(UsageError::DataType)
                }
            },
        }
    }

    /// Whether the last select chose a receive branch that got a sent value
    /// (as opposed to the terminal value of a closed channel or a send branch).
    pub fn received_ok(&self) -> bool {
        self.last.as_ref().is_some_and(|received| received.ok)
    }

    fn run(&mut self, block: bool) -> Result<Option<usize>, SelectError> {
        self.last = None;
        let mut branches = mem::take(&mut self.branches);
        let foreign = branches.iter().position(|branch| {
            branch
                .port
                .as_ref()
                .is_some_and(|port| port.runtime_id() != self.shared.id())
        });
        if let Some(index) = foreign {
            return Err(UsageError::ForeignChannel { index }.into());
        }

        let cx = Context::current(&self.shared);
        let shared = self.shared.clone();
        let mut g = shared.lock();

        loop {
            if let Some(index) = self.scan(&mut g, &mut branches)? {
                return Ok(Some(index));
            }
            if !block {
                return Ok(None);
            }

            // 没有就绪的分支，同时登记到所有channel上
            let start = self.start(branches.len());
            cx.register(&mut g, branches, start);

            match cx.park(&mut g) {
                // 对端已经替我们从其他channel上摘除
                Selected::Operation { index, data } => {
                    cx.clear(&mut g);
                    self.last = data.map(Received::value);
                    return Ok(Some(index));
                }
                // 关闭本身不算配对，但关闭的channel会在重新扫描时就绪
                Selected::Closed => branches = cx.take_registrations(&mut g),
                Selected::Interrupted => {
                    cx.clear(&mut g);
                    return Err(SelectError::Interrupted);
                }
                Selected::Waiting => illegal_state("select woke without an outcome"),
            }
        }
    }

    // 从随机位置开始把所有分支扫描一遍，第一个能完成的分支胜出
    fn scan(&mut self, g: &mut Guard<'_>, branches: &mut [Registration]) -> Result<Option<usize>, SelectError> {
        let n = branches.len();
        let start = self.start(n);
        for index in (0..n).map(|k| (start + k) % n) {
            let branch = &mut branches[index];
            let Some(port) = &branch.port else {
                continue;
            };
            match &mut branch.role {
                Role::Receive => {
                    if let Some(received) = port.try_receive_erased(g) {
                        self.last = Some(received);
                        return Ok(Some(index));
                    }
                }
                Role::Send(payload) => {
                    let Some(msg) = payload.take() else {
                        illegal_state("send branch lost its message");
                    };
                    match port.try_send_erased(g, msg) {
                        Ok(()) => return Ok(Some(index)),
                        Err(TrySendError::Full(msg)) => *payload = Some(msg),
                        Err(TrySendError::Closed(_)) => return Err(SelectError::Closed { index }),
                    }
                }
            }
        }
        Ok(None)
    }

    fn start(&mut self, n: usize) -> usize {
        if n == 0 {
            0
        } else {
            self.rng.gen_range(0..n)
        }
    }
}

impl fmt::Debug for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Select")
            .field("branches", &self.branches.len())
            .field("received_ok", &self.received_ok())
            .finish()
    }
}
