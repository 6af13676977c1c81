use kernel_sync::{InterruptControl, IrqGuard, SpinLock};
use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

/// Stand-in for the state the kernel keeps behind its lock.
#[derive(Debug, Default)]
struct Frames {
    free: Vec<u32>,
    handed_out: u32,
}

impl Frames {
    fn pop(&mut self) -> Option<u32> {
        let f = self.free.pop()?;
        self.handed_out += 1;
        Some(f)
    }
}

/// Software interrupt flag.
struct Flag(Cell<bool>);

impl InterruptControl for Flag {
    fn interrupts_enabled(&self) -> bool {
        self.0.get()
    }
    fn disable_interrupts(&self) {
        self.0.set(false);
    }
    fn enable_interrupts(&self) {
        self.0.set(true);
    }
}

#[test]
fn guard_releases_on_drop() {
    let frames = SpinLock::new(Frames {
        free: vec![0x100, 0x101],
        handed_out: 0,
    });
    assert_eq!(frames.lock().pop(), Some(0x101));
    assert!(!frames.is_locked());
    assert_eq!(frames.with_lock(Frames::pop), Some(0x100));
    assert_eq!(frames.into_inner().handed_out, 2);
}

#[test]
fn a_handler_only_tries() {
    let frames = SpinLock::new(Frames::default());
    let held = frames.lock();
    // what the page fault handler does when it interrupts the holder
    assert!(frames.try_lock().is_none());
    drop(held);
    let again = frames.try_lock();
    assert!(again.is_some_and(|f| f.handed_out == 0));
}

#[test]
fn lock_irq_masks_interrupts_until_the_guard_is_gone() {
    let flag = Flag(Cell::new(true));
    let frames = SpinLock::new(Frames {
        free: vec![7],
        handed_out: 0,
    });
    {
        let mut g = frames.lock_irq(&flag);
        assert_eq!(g.pop(), Some(7));
        assert!(!flag.interrupts_enabled());
        assert!(frames.is_locked());
    }
    assert!(flag.interrupts_enabled());
    assert!(!frames.is_locked());
}

#[test]
fn nested_guards_restore_the_outer_state() {
    let flag = Flag(Cell::new(false));
    let lock = SpinLock::new(());
    {
        let outer = IrqGuard::new(&flag);
        assert!(!outer.restores_interrupts());
        drop(lock.lock_irq(&flag));
        assert!(!flag.interrupts_enabled());
    }
    assert!(!flag.interrupts_enabled());
}

#[test]
fn a_panic_inside_the_section_unlocks() {
    let lock = SpinLock::new(Frames::default());
    let res = catch_unwind(AssertUnwindSafe(|| {
        lock.with_lock(|f| {
            f.handed_out = 3;
            panic!("handler died");
        })
    }));
    assert!(res.is_err());
    assert_eq!(lock.with_lock(|f| f.handed_out), 3);
}

#[test]
fn threads_never_share_the_section() {
    const THREADS: u32 = 4;
    const FRAMES_EACH: u32 = 2_000;

    let lock = Arc::new(SpinLock::new(Frames {
        free: (0..THREADS * FRAMES_EACH).collect(),
        handed_out: 0,
    }));
    let inside = Arc::new(AtomicBool::new(false));

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let inside = Arc::clone(&inside);
            thread::spawn(move || {
                let mut got = Vec::new();
                for _ in 0..FRAMES_EACH {
                    let mut f = lock.lock();
                    assert!(!inside.swap(true, Ordering::SeqCst), "two holders");
                    got.extend(f.pop());
                    inside.store(false, Ordering::SeqCst);
                    drop(f);
                    thread::yield_now();
                }
                got
            })
        })
        .collect();

    let mut all: Vec<u32> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();
    all.sort_unstable();
    all.dedup();
    assert_eq!(all.len() as u32, THREADS * FRAMES_EACH);
    assert_eq!(lock.lock().handed_out, THREADS * FRAMES_EACH);
}
