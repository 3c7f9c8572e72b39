use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// A simple lock-free stack that is pushed to by any thread and drained
/// all at once.
///
/// This is the hand-off between dropped keys and the segments they were
/// registered with. Elements are never popped individually, a drain detaches
/// the whole list with a single swap, so the usual ABA hazards of a Treiber
/// stack do not apply.
pub struct Stack<T> {
    head: AtomicPtr<Node<T>>,
}

struct Node<T> {
    value: T,
    next: *mut Node<T>,
}

impl<T> Stack<T> {
    /// Create a new `Stack`.
    pub fn new() -> Self {
        Self {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Returns `true` if there is nothing to drain.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed).is_null()
    }

    /// Add an entry to the stack.
    pub fn push(&self, value: T) {
        let node = Box::into_raw(Box::new(Node {
            value,
            next: ptr::null_mut(),
        }));

        loop {
            // Load the head node.
            let head = self.head.load(Ordering::Relaxed);

            // Link the node to the stack.
            //
            // Safety: The node is not shared until the exchange below succeeds.
            unsafe { (*node).next = head }

            // Attempt to push the node.
            //
            // `Release` publishes the node contents to the draining thread.
            if self
                .head
                .compare_exchange(head, node, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    /// Detach every element currently in the stack.
    ///
    /// Elements pushed concurrently either make it into the returned drain or
    /// stay in the stack for the next call.
    pub fn take(&self) -> Drain<T> {
        // Fast-path, avoid the write if there is nothing to take.
        if self.is_empty() {
            return Drain {
                head: ptr::null_mut(),
            };
        }

        Drain {
            head: self.head.swap(ptr::null_mut(), Ordering::Acquire),
        }
    }
}

impl<T> Default for Stack<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for Stack<T> {
    fn drop(&mut self) {
        drop(Drain {
            head: *self.head.get_mut(),
        });
    }
}

/// The elements detached from a [`Stack`], most recently pushed first.
pub struct Drain<T> {
    head: *mut Node<T>,
}

impl<T> Iterator for Drain<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.head.is_null() {
            return None;
        }

        // Safety: The list was detached from the stack, so we own every node.
        let node = unsafe { Box::from_raw(self.head) };
        self.head = node.next;
        Some(node.value)
    }
}

impl<T> Drop for Drain<T> {
    fn drop(&mut self) {
        for _ in self.by_ref() {}
    }
}

// Safety: The stack owns its elements and hands them out by value.
unsafe impl<T: Send> Send for Stack<T> {}
unsafe impl<T: Send> Sync for Stack<T> {}
