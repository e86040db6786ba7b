use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use csp_channel::{Channel, Interrupter, Runtime, SelectError, TrySendError, UsageError};
use pretty_assertions::assert_eq;

const DELAY: Duration = Duration::from_millis(150);

fn later<F: FnOnce() + Send + 'static>(delay: Duration, f: F) -> thread::JoinHandle<()> {
    thread::spawn(move || {
        thread::sleep(delay);
        f();
    })
}

fn spawn_interruptible<R, F>(rt: &Runtime, f: F) -> (Interrupter, thread::JoinHandle<R>)
where
    R: Send + 'static,
    F: FnOnce() -> R + Send + 'static,
{
    let handoff = rt.channel::<Interrupter>(1).unwrap();
    let handle = {
        let rt = rt.clone();
        let handoff = handoff.clone();
        thread::spawn(move || {
            handoff.send(rt.interrupter()).unwrap();
            f()
        })
    };
    let interrupter = handoff.receive().unwrap().unwrap();
    (interrupter, handle)
}

#[test]
fn select_waits_for_a_sender() {
    let rt = Runtime::new();
    let chan = rt.channel::<i32>(3).unwrap();
    let sender = {
        let chan = chan.clone();
        later(DELAY, move || chan.send(100).unwrap())
    };

    let mut select = rt.select();
    let started = Instant::now();
    assert_eq!(select.receive(Some(&chan)).select(), Ok(0));
    assert!(started.elapsed() >= DELAY - Duration::from_millis(20));
    assert_eq!(select.take_data::<i32>(), Ok(Some(100)));
    assert!(select.received_ok());
    sender.join().unwrap();
}

#[test]
fn parked_select_is_resolved_by_exactly_one_channel() {
    let rt = Runtime::new();
    let a = rt.channel::<i32>(3).unwrap();
    let b = rt.channel::<i32>(3).unwrap();
    let sender = {
        let (a, b) = (a.clone(), b.clone());
        later(DELAY, move || {
            a.send(100).unwrap();
            b.send(200).unwrap();
        })
    };

    let mut select = rt.select();
    for _ in 0..2 {
        let index = select.receive(Some(&a)).receive(Some(&b)).select().unwrap();
        let data = select.take_data::<i32>().unwrap();
        assert!(
            (index == 0 && data == Some(100)) || (index == 1 && data == Some(200)),
            "index {} data {:?}",
            index,
            data
        );
    }
    sender.join().unwrap();
    assert_eq!((a.len(), b.len()), (0, 0));
}

#[test]
fn parked_select_on_mixed_types_hands_over_the_sent_value() {
    let rt = Runtime::new();
    let numbers = rt.channel::<u64>(0).unwrap();
    let words = rt.channel::<&'static str>(0).unwrap();
    let sender = {
        let words = words.clone();
        later(DELAY, move || words.send("hello").unwrap())
    };

    let mut select = rt.select();
    let index = select
        .receive(Some(&numbers))
        .receive(Some(&words))
        .select()
        .unwrap();
    assert_eq!(index, 1);
    assert_eq!(select.take_data::<&str>(), Ok(Some("hello")));
    sender.join().unwrap();
    // 另一个分支已经被摘除，不会吞掉之后的发送
    assert!(numbers.try_send(1).unwrap_err().is_full());
}

#[test]
fn parked_send_branch_is_taken_by_a_receiver() {
    let rt = Runtime::new();
    let out = rt.channel::<i32>(0).unwrap();
    let unused = rt.channel::<i32>(0).unwrap();
    let receiver = {
        let out = out.clone();
        later(DELAY, move || assert_eq!(out.receive(), Ok(Some(7))))
    };

    let mut select = rt.select();
    let index = select
        .receive(Some(&unused))
        .send(Some(&out), 7)
        .select()
        .unwrap();
    assert_eq!(index, 1);
    assert_eq!(select.take_data::<i32>(), Err(UsageError::NoReceive));
    receiver.join().unwrap();
    assert!(unused.try_send(1).unwrap_err().is_full());
}

#[test]
fn send_branches_to_the_same_channel() {
    let rt = Runtime::new();
    let chan = rt.channel::<i32>(3).unwrap();
    let mut select = rt.select();
    let index = select.send(Some(&chan), 100).send(Some(&chan), 200).select().unwrap();
    assert!(index == 0 || index == 1);
    assert_eq!(select.take_data::<i32>(), Err(UsageError::NoReceive));
    assert_eq!(chan.receive(), Ok(Some(if index == 0 { 100 } else { 200 })));
    assert_eq!(chan.len(), 0);
}

#[test]
fn ready_branches_are_chosen_fairly() {
    let rt = Runtime::new();
    let a = rt.channel::<i32>(100).unwrap();
    let b = rt.channel::<f32>(100).unwrap();
    for i in 0..100 {
        a.send(i).unwrap();
        b.send(i as f32).unwrap();
    }

    let mut counts = [0usize; 2];
    let mut select = rt.select();
    for _ in 0..100 {
        counts[select.receive(Some(&a)).receive(Some(&b)).select().unwrap()] += 1;
    }
    assert_eq!(counts[0] + counts[1], 100);
    assert!(counts[0] >= 10 && counts[1] >= 10, "counts {:?}", counts);
}

#[test]
fn ready_send_and_receive_branches_are_mixed_fairly() {
    let rt = Runtime::new();
    let a = rt.channel::<i32>(100).unwrap();
    let b = rt.channel::<f32>(100).unwrap();
    let c = rt.channel::<i32>(100).unwrap();
    for i in 0..100 {
        a.send(i).unwrap();
        b.send(i as f32).unwrap();
    }

    let mut counts = [0usize; 3];
    let mut select = rt.select();
    for _ in 0..60 {
        let index = select
            .receive(Some(&a))
            .receive(Some(&b))
            .send(Some(&c), 0)
            .select()
            .unwrap();
        counts[index] += 1;
    }
    assert!(counts.iter().all(|&n| n > 5), "counts {:?}", counts);
    assert_eq!(c.len(), counts[2]);
}

#[test]
fn closed_receive_branch_is_ready_with_terminal() {
    let rt = Runtime::new();
    let idle = rt.channel::<i32>(0).unwrap();
    let closed = rt.channel::<f32>(1).unwrap();
    closed.close_with(99.0);

    let mut select = rt.select();
    for _ in 0..20 {
        let index = select
            .receive(Some(&idle))
            .receive(Some(&closed))
            .send(Some(&idle), 1)
            .select()
            .unwrap();
        assert_eq!(index, 1);
        assert!(!select.received_ok());
        assert_eq!(select.take_data::<f32>(), Ok(Some(99.0)));
    }
}

#[test]
fn closed_receive_branch_competes_with_ready_ones() {
    let rt = Runtime::new();
    let ready = rt.channel::<i32>(100).unwrap();
    for i in 0..100 {
        ready.send(i).unwrap();
    }
    let closed = rt.channel::<i32>(1).unwrap();
    closed.close();

    let mut counts = [0usize; 2];
    let mut select = rt.select();
    for _ in 0..50 {
        let index = select.receive(Some(&ready)).receive(Some(&closed)).select().unwrap();
        if index == 1 {
            assert_eq!(select.take_data::<i32>(), Ok(None));
        }
        counts[index] += 1;
    }
    assert!(counts[0] > 5 && counts[1] > 5, "counts {:?}", counts);
}

#[test]
fn closed_send_branch_raises_only_when_chosen() {
    let rt = Runtime::new();
    let ready = rt.channel::<i32>(100).unwrap();
    for i in 0..100 {
        ready.send(i).unwrap();
    }
    let closed = rt.channel::<i32>(100).unwrap();
    closed.close();

    let (mut ok, mut failed) = (0, 0);
    let mut select = rt.select();
    for _ in 0..50 {
        match select.receive(Some(&ready)).send(Some(&closed), 0).select() {
            Ok(0) => ok += 1,
            Err(SelectError::Closed { index: 1 }) => failed += 1,
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(ok > 5 && failed > 5, "ok {} failed {}", ok, failed);
}

#[test]
fn close_while_parked_on_send_fails_the_select() {
    let rt = Runtime::new();
    let chan = rt.channel::<i32>(3).unwrap();
    let closer = {
        let chan = chan.clone();
        later(DELAY, move || chan.close())
    };

    let mut select = rt.select();
    let started = Instant::now();
    let err = loop {
        match select.send(Some(&chan), 0).select() {
            Ok(index) => assert_eq!(index, 0),
            Err(err) => break err,
        }
    };
    assert_eq!(err, SelectError::Closed { index: 0 });
    assert!(started.elapsed() >= DELAY - Duration::from_millis(20));
    closer.join().unwrap();
}

#[test]
fn close_wakes_a_parked_select_receive() {
    let rt = Runtime::new();
    let a = rt.channel::<i32>(0).unwrap();
    let b = rt.channel::<i32>(0).unwrap();
    let closer = {
        let b = b.clone();
        later(DELAY, move || b.close_with(-1))
    };

    let mut select = rt.select();
    assert_eq!(select.receive(Some(&a)).receive(Some(&b)).select(), Ok(1));
    assert!(!select.received_ok());
    assert_eq!(select.take_data::<i32>(), Ok(Some(-1)));
    closer.join().unwrap();
    assert!(a.try_send(1).unwrap_err().is_full());
}

#[test]
fn close_of_a_send_branch_fails_a_parked_select() {
    let rt = Runtime::new();
    let data = rt.channel::<i32>(0).unwrap();
    let closing = rt.channel::<i32>(0).unwrap();
    let helper = {
        let (data, closing) = (data.clone(), closing.clone());
        later(DELAY, move || {
            closing.close();
            thread::sleep(DELAY);
            data.send(5).unwrap();
        })
    };

    // 关闭的是send分支所在的channel：被唤醒后重新扫描，选中的是该分支并报错
    let mut select = rt.select();
    let got = select.receive(Some(&data)).send(Some(&closing), 1).select();
    assert_eq!(got, Err(SelectError::Closed { index: 1 }));

    // 只剩receive分支时继续等待数据
    assert_eq!(select.receive(Some(&data)).select(), Ok(0));
    assert_eq!(select.take_data::<i32>(), Ok(Some(5)));
    helper.join().unwrap();
}

#[test]
fn nonblock_returns_none_and_registers_nothing() {
    let rt = Runtime::new();
    let rendezvous = rt.channel::<u8>(0).unwrap();
    let full = rt.channel::<u8>(1).unwrap();
    full.send(9).unwrap();

    let mut select = rt.select();
    let got = select
        .receive(Some(&rendezvous))
        .send(Some(&rendezvous), 1)
        .send(Some(&full), 2)
        .select_nonblock();
    assert_eq!(got, Ok(None));

    // 如果留下了登记，这两个操作都会被配对
    assert_eq!(rendezvous.try_send(3), Err(TrySendError::Full(3)));
    assert_eq!(rendezvous.try_receive(), None);
    assert_eq!(full.len(), 1);
    assert_eq!(full.receive(), Ok(Some(9)));

    let again = select.receive(Some(&rendezvous)).send(Some(&full), 2).select_nonblock();
    assert_eq!(again, Ok(Some(1)));
    assert_eq!(full.receive(), Ok(Some(2)));
}

#[test]
fn absent_send_branch_is_ignored() {
    let rt = Runtime::new();
    let chan = rt.channel::<i32>(100).unwrap();
    let mut select = rt.select();
    for i in 0..100 {
        assert_eq!(select.send::<i32>(None, 0).send(Some(&chan), i).select(), Ok(1));
    }
    assert_eq!(chan.iter().take(100).collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
}

#[test]
fn select_without_usable_branches_waits_until_interrupted() {
    let rt = Runtime::new();
    let (interrupter, handle) = spawn_interruptible(&rt, {
        let rt = rt.clone();
        move || {
            let started = Instant::now();
            let got = rt.select().receive::<i32>(None).send::<i32>(None, 0).select();
            (got, started.elapsed())
        }
    });
    thread::sleep(DELAY);
    interrupter.interrupt();
    let (got, waited) = handle.join().unwrap();
    assert_eq!(got, Err(SelectError::Interrupted));
    assert!(waited >= DELAY - Duration::from_millis(20));
}

#[test]
fn interrupted_select_detaches_from_every_channel() {
    let rt = Runtime::new();
    let a = rt.channel::<i32>(0).unwrap();
    let b = rt.channel::<i32>(0).unwrap();
    let (interrupter, handle) = spawn_interruptible(&rt, {
        let (rt, a, b) = (rt.clone(), a.clone(), b.clone());
        move || rt.select().receive(Some(&a)).send(Some(&b), 1).select()
    });
    thread::sleep(DELAY);
    interrupter.interrupt();
    assert_eq!(handle.join().unwrap(), Err(SelectError::Interrupted));

    assert!(a.try_send(1).unwrap_err().is_full());
    assert_eq!(b.try_receive(), None);
}

// 同一个channel出现两次时，两项都有机会被选中
fn duplicate_receive_trial(rt: &Runtime, sender_first: bool) -> usize {
    let chan = rt.channel::<i32>(0).unwrap();
    let sender = {
        let chan = chan.clone();
        later(
            if sender_first { Duration::ZERO } else { Duration::from_millis(10) },
            move || chan.send(0).unwrap(),
        )
    };
    if sender_first {
        thread::sleep(Duration::from_millis(10));
    }
    let index = rt.select().receive(Some(&chan)).receive(Some(&chan)).select().unwrap();
    sender.join().unwrap();
    index
}

#[test]
fn duplicate_receive_entries_are_chosen_randomly() {
    let rt = Runtime::new();
    for sender_first in [false, true] {
        let mut counts = [0usize; 2];
        for _ in 0..40 {
            counts[duplicate_receive_trial(&rt, sender_first)] += 1;
        }
        assert!(counts[0] > 4 && counts[1] > 4, "counts {:?}", counts);
    }
}

#[test]
fn duplicate_send_entries_are_chosen_randomly() {
    let rt = Runtime::new();
    let n1 = Arc::new(AtomicUsize::new(0));
    let n2 = Arc::new(AtomicUsize::new(0));
    for trial in 0..40 {
        let chan = rt.channel::<i32>(0).unwrap();
        let receiver = {
            let (chan, n1, n2) = (chan.clone(), n1.clone(), n2.clone());
            later(Duration::from_millis(trial % 2 * 10), move || {
                match chan.receive() {
                    Ok(Some(1)) => n1.fetch_add(1, Ordering::SeqCst),
                    Ok(Some(2)) => n2.fetch_add(1, Ordering::SeqCst),
                    other => panic!("unexpected {:?}", other),
                };
            })
        };
        rt.select().send(Some(&chan), 1).send(Some(&chan), 2).select().unwrap();
        receiver.join().unwrap();
    }
    let (n1, n2) = (n1.load(Ordering::SeqCst), n2.load(Ordering::SeqCst));
    assert_eq!(n1 + n2, 40);
    assert!(n1 > 4 && n2 > 4, "n1 {} n2 {}", n1, n2);
}

#[test]
fn duplicate_entries_under_contention() {
    const N: usize = 500;
    let rt = Runtime::new();
    let ch1 = rt.channel::<i32>(0).unwrap();
    let ch2 = rt.channel::<i32>(0).unwrap();
    let ch3 = rt.channel::<i32>(1).unwrap();

    let peer = {
        let (rt, ch1, ch2, ch3) = (rt.clone(), ch1.clone(), ch2.clone(), ch3.clone());
        thread::spawn(move || {
            let mut select = rt.select();
            let mut received = 0;
            loop {
                let index = select
                    .receive(Some(&ch1))
                    .receive(Some(&ch1))
                    .send(Some(&ch2), 100)
                    .send(Some(&ch2), 100)
                    .receive(Some(&ch3))
                    .receive(Some(&ch3))
                    .select()
                    .unwrap();
                if index >= 4 && !select.received_ok() {
                    return received;
                }
                if index < 2 || index >= 4 {
                    received += 1;
                }
            }
        })
    };

    let mut select = rt.select();
    let mut sent = 0;
    for _ in 0..N {
        let index = select
            .send(Some(&ch1), 1)
            .send(Some(&ch1), 2)
            .receive(Some(&ch2))
            .receive(Some(&ch2))
            .send(Some(&ch3), 5)
            .send(Some(&ch3), 6)
            .select()
            .unwrap();
        if index < 2 || index >= 4 {
            sent += 1;
        }
    }
    ch3.close();
    assert_eq!(peer.join().unwrap(), sent);
}

#[test]
fn many_selects_ping_pong() {
    const ROUNDS: usize = 2_000;
    let rt = Runtime::new();
    let ping = rt.channel::<usize>(0).unwrap();
    let pong = rt.channel::<usize>(0).unwrap();
    let quit = rt.channel::<()>(0).unwrap();

    let echo = {
        let (rt, ping, pong, quit) = (rt.clone(), ping.clone(), pong.clone(), quit.clone());
        thread::spawn(move || {
            let mut select = rt.select();
            let mut echoed = 0;
            loop {
                match select.receive(Some(&ping)).receive(Some(&quit)).select().unwrap() {
                    0 => {
                        let n = select.take_data::<usize>().unwrap().unwrap();
                        select.send(Some(&pong), n + 1).select().unwrap();
                        echoed += 1;
                    }
                    _ => return echoed,
                }
            }
        })
    };

    for i in 0..ROUNDS {
        ping.send(i).unwrap();
        assert_eq!(pong.receive(), Ok(Some(i + 1)));
    }
    quit.close();
    assert_eq!(echo.join().unwrap(), ROUNDS);
}

#[test]
fn channels_from_another_runtime_are_a_usage_error() {
    let rt = Runtime::new();
    let other = Runtime::new();
    let foreign: Channel<i32> = other.channel(1).unwrap();
    let err = rt.select().send(Some(&foreign), 1).select().unwrap_err();
    assert_eq!(err, SelectError::Usage(UsageError::ForeignChannel { index: 0 }));
    assert_eq!(foreign.len(), 0);
}
