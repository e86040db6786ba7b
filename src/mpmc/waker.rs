use std::{collections::VecDeque, ptr, sync::Arc};

use super::{
    array::Received,
    context::{unbox, Context, Payload, Side},
    errors::{illegal_state, TrySendError},
    lock::Guard,
};

// channel对上下文和select暴露的类型擦除接口，所有方法都在全局锁下调用
pub(crate) trait Port: Send + Sync {
    fn runtime_id(&self) -> u64;

    // 非阻塞发送，失败时原样交还信息
    fn try_send_erased(&self, g: &mut Guard<'_>, payload: Payload) -> Result<(), TrySendError<Payload>>;

    // 非阻塞接收，None代表会阻塞
    fn try_receive_erased(&self, g: &mut Guard<'_>) -> Option<Received<Payload>>;

    // 把上下文登记项的第slot项挂到发送或接收队列尾部
    fn park(&self, g: &mut Guard<'_>, cx: &Arc<Context>, slot: usize, side: Side);

    // 摘除登记项，不存在时返回false
    fn unpark(&self, g: &mut Guard<'_>, cx: &Context, slot: usize, side: Side) -> bool;
}

// Entry代表一个线程阻塞在一个指定的channel上的操作
pub(crate) struct Entry {
    pub(crate) cx: Arc<Context>,
    // 在上下文登记集合中的下标
    pub(crate) slot: usize,
}

impl Entry {
    // 把msg直接交给这个等待的接收者并唤醒它
    pub(crate) fn deliver<T: Send + 'static>(self, g: &mut Guard<'_>, msg: T) {
        self.cx.resolve(g, self.slot, Some(Box::new(msg)));
    }

    // 取走这个等待的发送者的msg并唤醒它
    pub(crate) fn take<T: 'static>(self, g: &mut Guard<'_>) -> T {
        match self.cx.resolve(g, self.slot, None) {
            Some(payload) => unbox(payload),
            None => illegal_state("parked sender has no message"),
        }
    }
}

// 一个channel上阻塞的一方，严格按照到达顺序配对
pub(crate) struct Waker {
    entries: VecDeque<Entry>,
}

impl Waker {
    #[inline]
    pub(crate) fn new() -> Self {
        Waker {
            entries: VecDeque::new(),
        }
    }

    #[inline]
    pub(crate) fn register(&mut self, cx: &Arc<Context>, slot: usize) {
        self.entries.push_back(Entry {
            cx: cx.clone(),
            slot,
        });
    }

    // 按(上下文, slot)精确摘除，同一个上下文在这里可能有多项
    pub(crate) fn unregister(&mut self, cx: &Context, slot: usize) -> Option<Entry> {
        let pos = self
            .entries
            .iter()
            .position(|entry| ptr::eq(Arc::as_ptr(&entry.cx), cx) && entry.slot == slot)?;
        self.entries.remove(pos)
    }

    // 队头，也就是等待最久的一方
    #[inline]
    pub(crate) fn pop(&mut self) -> Option<Entry> {
        self.entries.pop_front()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    // channel被关闭时需要唤醒的上下文
    // 这里不会从队列中移除entry，被唤醒的线程会自己调用unregister
    pub(crate) fn disconnect(&self) -> Vec<Arc<Context>> {
        self.entries.iter().map(|entry| entry.cx.clone()).collect()
    }
}

impl Drop for Waker {
    #[inline]
    fn drop(&mut self) {
        debug_assert_eq!(self.entries.len(), 0);
    }
}
