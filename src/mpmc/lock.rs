use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::config::Config;
use super::errors::illegal_state;

// 每个Runtime有一个进程内唯一的id，Locked单元格用它来确认自己属于哪一把锁
static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

// Runtime共享的部分：全局协调锁和配置
// 所有channel和context的状态迁移都必须持有这把锁，select需要一次性检查/注册多个channel
#[derive(Debug)]
pub(crate) struct Shared {
    id: u64,
    lock: Mutex<()>,
    config: Config,
    // 为每个Select派生不同的随机种子
    select_seq: AtomicU64,
}

impl Shared {
    pub(crate) fn new(config: Config) -> Self {
        Shared {
            id: NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed),
            lock: Mutex::new(()),
            config,
            select_seq: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn next_select_seq(&self) -> u64 {
        self.select_seq.fetch_add(1, Ordering::Relaxed)
    }

    // 获取全局锁
    #[inline]
    pub(crate) fn lock(&self) -> Guard<'_> {
        Guard {
            id: self.id,
            inner: self.lock.lock(),
        }
    }
}

// 全局锁的守卫，也是访问Locked单元格的凭证
// 通过&mut Guard借用状态，保证同一时刻只有一个状态引用存活
pub(crate) struct Guard<'a> {
    id: u64,
    inner: MutexGuard<'a, ()>,
}

impl Guard<'_> {
    // 在线程私有的条件变量上等待，等待期间释放全局锁
    #[inline]
    pub(crate) fn wait(&mut self, cond: &Condvar) {
        cond.wait(&mut self.inner);
    }
}

// 只能在持有所属Runtime全局锁时访问的状态
pub(crate) struct Locked<T> {
    owner: u64,
    cell: UnsafeCell<T>,
}

// 所有访问都经过Guard串行化
unsafe impl<T: Send> Send for Locked<T> {}
unsafe impl<T: Send> Sync for Locked<T> {}

impl<T> Locked<T> {
    pub(crate) fn new(owner: u64, value: T) -> Self {
        Locked {
            owner,
            cell: UnsafeCell::new(value),
        }
    }

    // 返回的引用与guard的可变借用绑定，两次get不可能同时存活
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub(crate) fn get<'g>(&'g self, guard: &'g mut Guard<'_>) -> &'g mut T {
        if guard.id != self.owner {
            illegal_state("state accessed under a foreign runtime lock");
        }
        unsafe { &mut *self.cell.get() }
    }
}
