use tokio_util::sync::CancellationToken;

/// Ends the wrapped iterator as soon as the token is cancelled. Callers tell cancellation apart
/// from exhaustion by checking the token after the loop.
pub struct CancelIter<I> {
    inner: I,
    cancel: CancellationToken,
}

impl<I> CancelIter<I> {
    pub fn new(inner: I, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

impl<I: Iterator> Iterator for CancelIter<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_after_cancel() {
        let cancel = CancellationToken::new();
        let mut iter = CancelIter::new(0..10, cancel.clone());
        assert_eq!(iter.next(), Some(0));
        assert_eq!(iter.next(), Some(1));
        cancel.cancel();
        assert_eq!(iter.next(), None);
    }
}
