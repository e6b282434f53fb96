//! The topic-word sufficient statistics.
//!
//! A single dense `(T+1) × W` tensor of word counts, with row `T` holding the
//! background pseudo-topic, plus the per-row totals and the global
//! background/foreground split. Rows, totals and the split move together:
//! every mutation goes through [`TopicCounts::increment`] /
//! [`TopicCounts::decrement`], which keep the three levels consistent.
//!
//! Mutation is single-threaded by contract: workers hold `&TopicCounts` for
//! the whole batch and the orchestrator applies their deltas afterwards, so
//! no atomics are needed (and none are wanted — the within-batch staleness
//! is part of the sampling design).

pub const BACKGROUND_SPLIT: usize = 0;
pub const FOREGROUND_SPLIT: usize = 1;

pub struct TopicCounts {
    topics: usize,
    words: usize,
    topic_word: Vec<u32>,
    topic_total: Vec<u64>,
    split_total: [u64; 2],
}

impl TopicCounts {
    /// Zeroed counts for `topics` foreground topics over a `words`-word
    /// dictionary (one extra row for the background).
    pub fn new(topics: usize, words: usize) -> Self {
        Self {
            topics,
            words,
            topic_word: vec![0; (topics + 1) * words],
            topic_total: vec![0; topics + 1],
            split_total: [0, 0],
        }
    }

    pub fn topics(&self) -> usize {
        self.topics
    }

    pub fn words(&self) -> usize {
        self.words
    }

    /// Row index of the background pseudo-topic.
    pub fn background(&self) -> usize {
        self.topics
    }

    #[inline]
    pub fn word_count(&self, topic: usize, word: usize) -> u32 {
        self.topic_word[topic * self.words + word]
    }

    pub fn row(&self, topic: usize) -> &[u32] {
        &self.topic_word[topic * self.words..(topic + 1) * self.words]
    }

    pub fn row_mut(&mut self, topic: usize) -> &mut [u32] {
        &mut self.topic_word[topic * self.words..(topic + 1) * self.words]
    }

    #[inline]
    pub fn topic_total(&self, topic: usize) -> u64 {
        self.topic_total[topic]
    }

    /// Total background-tagged words across the corpus.
    pub fn background_total(&self) -> u64 {
        self.split_total[BACKGROUND_SPLIT]
    }

    /// Total foreground-tagged words across the corpus.
    pub fn foreground_total(&self) -> u64 {
        self.split_total[FOREGROUND_SPLIT]
    }

    #[inline]
    fn split_of(&self, topic: usize) -> usize {
        if topic == self.topics {
            BACKGROUND_SPLIT
        } else {
            FOREGROUND_SPLIT
        }
    }

    #[inline]
    pub fn increment(&mut self, topic: usize, word: usize) {
        self.topic_word[topic * self.words + word] += 1;
        self.topic_total[topic] += 1;
        self.split_total[self.split_of(topic)] += 1;
    }

    #[inline]
    pub fn decrement(&mut self, topic: usize, word: usize) {
        let cell = &mut self.topic_word[topic * self.words + word];
        assert!(*cell > 0, "topic {topic} word {word} count underflow");
        *cell -= 1;
        let total = &mut self.topic_total[topic];
        assert!(*total > 0, "topic {topic} total underflow");
        *total -= 1;
        let split = self.split_of(topic);
        assert!(self.split_total[split] > 0, "split {split} total underflow");
        self.split_total[split] -= 1;
    }

    pub fn clear(&mut self) {
        self.topic_word.fill(0);
        self.topic_total.fill(0);
        self.split_total = [0, 0];
    }

    /// Rebuild the totals from the word tensor. Used after bulk row loads.
    pub fn recompute_totals(&mut self) {
        self.split_total = [0, 0];
        for topic in 0..=self.topics {
            let sum: u64 = self.row(topic).iter().map(|&c| u64::from(c)).sum();
            self.topic_total[topic] = sum;
            self.split_total[self.split_of(topic)] += sum;
        }
    }

    /// Panic unless every derived total matches the word tensor. Cheap
    /// relative to an iteration; used by tests and callable after a load.
    pub fn assert_consistent(&self) {
        let mut split = [0u64; 2];
        for topic in 0..=self.topics {
            let sum: u64 = self.row(topic).iter().map(|&c| u64::from(c)).sum();
            assert_eq!(
                sum,
                self.topic_total[topic],
                "topic {topic} total disagrees with its row"
            );
            split[self.split_of(topic)] += sum;
        }
        assert_eq!(split, self.split_total, "split totals disagree with rows");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_update_all_three_levels() {
        let mut counts = TopicCounts::new(3, 5);
        counts.increment(0, 2);
        counts.increment(0, 2);
        counts.increment(3, 4); // background row
        assert_eq!(counts.word_count(0, 2), 2);
        assert_eq!(counts.topic_total(0), 2);
        assert_eq!(counts.foreground_total(), 2);
        assert_eq!(counts.background_total(), 1);
        counts.assert_consistent();
    }

    #[test]
    fn decrement_reverses_increment() {
        let mut counts = TopicCounts::new(2, 4);
        counts.increment(1, 3);
        counts.increment(2, 0);
        counts.decrement(1, 3);
        counts.decrement(2, 0);
        assert_eq!(counts.topic_total(1), 0);
        assert_eq!(counts.background_total(), 0);
        counts.assert_consistent();
    }

    #[test]
    #[should_panic(expected = "count underflow")]
    fn decrement_of_zero_count_panics() {
        let mut counts = TopicCounts::new(2, 4);
        counts.decrement(0, 0);
    }

    #[test]
    fn recompute_totals_matches_incremental_bookkeeping() {
        let mut counts = TopicCounts::new(4, 8);
        for i in 0..100usize {
            counts.increment(i % 5, (i * 3) % 8);
        }
        let fg = counts.foreground_total();
        let bg = counts.background_total();
        counts.recompute_totals();
        assert_eq!(counts.foreground_total(), fg);
        assert_eq!(counts.background_total(), bg);
        counts.assert_consistent();
    }

    #[test]
    fn rows_are_disjoint_windows() {
        let mut counts = TopicCounts::new(2, 3);
        counts.row_mut(0).copy_from_slice(&[1, 2, 3]);
        counts.row_mut(2).copy_from_slice(&[7, 8, 9]);
        counts.recompute_totals();
        assert_eq!(counts.row(0), &[1, 2, 3]);
        assert_eq!(counts.row(1), &[0, 0, 0]);
        assert_eq!(counts.row(2), &[7, 8, 9]);
        assert_eq!(counts.topic_total(0), 6);
        assert_eq!(counts.background_total(), 24);
    }
}
