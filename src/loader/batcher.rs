use crate::trade::Trade;

/// A group of trades submitted to the sink as one logical write
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    /// Position of the batch within its file, starting at 0
    pub index: usize,
    pub trades: Vec<Trade>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }
}

/// Accumulates trades into batches of at most `capacity` records
#[derive(Debug)]
pub struct Batcher {
    capacity: usize,
    pending: Vec<Trade>,
    next_index: usize,
}

impl Batcher {
    /// A capacity of 0 is treated as 1
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            pending: Vec::with_capacity(capacity),
            next_index: 0,
        }
    }

    /// Add a trade; returns true once the pending batch is full
    pub fn push(&mut self, trade: Trade) -> bool {
        self.pending.push(trade);
        self.pending.len() >= self.capacity
    }

    /// Take the pending trades as a batch and start a fresh one
    pub fn take(&mut self) -> Batch {
        let trades = std::mem::replace(&mut self.pending, Vec::with_capacity(self.capacity));
        let batch = Batch {
            index: self.next_index,
            trades,
        };
        self.next_index += 1;
        batch
    }

    /// Final partial batch, or `None` when nothing is pending
    pub fn flush_remainder(&mut self) -> Option<Batch> {
        if self.pending.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn trade(n: i64) -> Trade {
        Trade {
            ticker: format!("T{}", n),
            gross_amount: n as f64,
            quantity: n,
            entry_time: Utc.with_ymd_and_hms(1970, 1, 1, 12, 0, 0).unwrap(),
            trade_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        }
    }

    fn batch_sizes(records: usize, capacity: usize) -> Vec<usize> {
        let mut batcher = Batcher::new(capacity);
        let mut sizes = Vec::new();
        for n in 0..records {
            if batcher.push(trade(n as i64)) {
                sizes.push(batcher.take().len());
            }
        }
        if let Some(batch) = batcher.flush_remainder() {
            sizes.push(batch.len());
        }
        sizes
    }

    #[test]
    fn test_batch_count_and_sizes() {
        assert_eq!(batch_sizes(3, 2), vec![2, 1]);
        assert_eq!(batch_sizes(4, 2), vec![2, 2]);
        assert_eq!(batch_sizes(7, 3), vec![3, 3, 1]);
        assert_eq!(batch_sizes(1, 1000), vec![1]);
        assert!(batch_sizes(0, 5).is_empty());

        for (records, capacity) in [(10, 3), (9, 3), (1000, 7), (5, 1)] {
            let sizes = batch_sizes(records, capacity);
            assert_eq!(sizes.len(), records.div_ceil(capacity));
            assert_eq!(sizes.iter().sum::<usize>(), records);
            assert!(sizes[..sizes.len() - 1].iter().all(|s| *s == capacity));
        }
    }

    #[test]
    fn test_batches_are_indexed_in_order() {
        let mut batcher = Batcher::new(2);
        let mut indexes = Vec::new();
        for n in 0..5 {
            if batcher.push(trade(n)) {
                indexes.push(batcher.take().index);
            }
        }
        let last = batcher.flush_remainder().unwrap();
        indexes.push(last.index);

        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(last.trades[0].quantity, 4);
        assert_eq!(batcher.flush_remainder(), None);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let mut batcher = Batcher::new(0);
        assert!(batcher.push(trade(1)));
        assert_eq!(batcher.take().len(), 1);
    }
}
