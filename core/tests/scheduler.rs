//! Integration tests for the dynamic scheduler

use anyhow::bail;
use chorus_core::{ChorusError, DynamicScheduler, SchedulerState, Task};
use std::collections::HashMap;
use std::thread;
use std::time::Duration;
use tracing_test::traced_test;

/// Counts words per document and keeps the totals on the task instance.
#[derive(Default)]
struct WordCount {
    documents: usize,
    words: HashMap<String, usize>,
}

impl Task<String, usize> for WordCount {
    fn run(&mut self, input: &String) -> anyhow::Result<usize> {
        if input.is_empty() {
            bail!("empty document");
        }
        // simulate uneven cost
        thread::sleep(Duration::from_micros((input.len() * 50) as u64));
        let mut count = 0;
        for word in input.split_whitespace() {
            *self.words.entry(word.to_string()).or_default() += 1;
            count += 1;
        }
        self.documents += 1;
        Ok(count)
    }
}

fn documents(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| {
            let repeat = 1 + (i * 7) % 13;
            vec!["alpha beta"; repeat].join(" ")
        })
        .collect()
}

#[test]
#[traced_test]
fn test_workers_share_uneven_batch() {
    let tasks: Vec<WordCount> = (0..4).map(|_| WordCount::default()).collect();
    let scheduler = DynamicScheduler::new(tasks);
    assert_eq!(scheduler.num_workers(), 4);

    let docs = documents(50);
    let expected_words: usize = docs.iter().map(|d| d.split_whitespace().count()).sum();

    scheduler.start().unwrap();
    scheduler.submit_all(docs).unwrap();
    scheduler.stop().unwrap();

    let mut outputs = 0;
    let mut words = 0;
    while let Some(output) = scheduler.wait_for_output() {
        words += output.result.unwrap();
        outputs += 1;
    }
    assert_eq!(outputs, 50);
    assert_eq!(words, expected_words);

    let tasks = scheduler.tasks().unwrap();
    assert_eq!(tasks.iter().map(|t| t.documents).sum::<usize>(), 50);
    let alpha: usize = tasks.iter().map(|t| t.words.get("alpha").copied().unwrap_or(0)).sum();
    assert_eq!(alpha * 2, expected_words);
}

#[test]
fn test_failed_item_is_reported() {
    let scheduler = DynamicScheduler::new(vec![WordCount::default(), WordCount::default()]);
    scheduler.start().unwrap();
    scheduler
        .submit_all(vec!["one two".to_string(), String::new(), "three".to_string()])
        .unwrap();
    scheduler.stop().unwrap();

    let mut outputs = scheduler.drain_outputs();
    outputs.sort_by(|a, b| a.input.cmp(&b.input));
    assert_eq!(outputs.len(), 3);
    assert!(matches!(
        outputs[0].result,
        Err(ChorusError::TaskExecution { .. })
    ));
    assert_eq!(outputs[1].result.as_ref().unwrap(), &2);
    assert_eq!(outputs[2].result.as_ref().unwrap(), &1);

    let tasks = scheduler.into_tasks().unwrap();
    assert_eq!(tasks.iter().map(|t| t.documents).sum::<usize>(), 2);
}

#[test]
fn test_restart_keeps_unclaimed_outputs() {
    let square = |x: &u64| -> anyhow::Result<u64> { Ok(x * x) };
    let scheduler: DynamicScheduler<u64, u64, _> = DynamicScheduler::new(vec![square; 3]);

    scheduler.start().unwrap();
    scheduler.submit_all(1..=4).unwrap();
    scheduler.stop().unwrap();

    scheduler.start().unwrap();
    assert_eq!(scheduler.state(), SchedulerState::Running);
    scheduler.submit_all(5..=6).unwrap();
    scheduler.stop().unwrap();

    let mut results: Vec<u64> = scheduler
        .drain_outputs()
        .into_iter()
        .map(|o| o.result.unwrap())
        .collect();
    results.sort_unstable();
    assert_eq!(results, vec![1, 4, 9, 16, 25, 36]);
    assert!(scheduler.wait_for_output().is_none());
}

#[test]
fn test_lifecycle_errors() {
    let scheduler = DynamicScheduler::new(vec![WordCount::default()]);
    assert!(matches!(
        scheduler.submit("early".to_string()),
        Err(ChorusError::InvalidState { .. })
    ));
    assert!(scheduler.stop().is_err());

    scheduler.start().unwrap();
    assert!(scheduler.start().is_err());
    assert!(scheduler.tasks().is_err());
    scheduler.stop().unwrap();
    scheduler.stop().unwrap();

    assert!(matches!(
        scheduler.submit("late".to_string()),
        Err(ChorusError::InvalidState { .. })
    ));
}

#[test]
fn test_outputs_streamed_while_running() {
    let slow = |x: &u32| -> anyhow::Result<u32> {
        thread::sleep(Duration::from_millis(5));
        Ok(x + 1)
    };
    let scheduler: DynamicScheduler<u32, u32, _> = DynamicScheduler::new(vec![slow; 2]);
    scheduler.start().unwrap();
    scheduler.submit_all(0..10).unwrap();

    let mut seen = Vec::new();
    while seen.len() < 10 {
        let output = scheduler.wait_for_output().unwrap();
        assert_eq!(output.result.unwrap(), output.input + 1);
        seen.push(output.input);
    }
    scheduler.stop().unwrap();

    seen.sort_unstable();
    assert_eq!(seen, (0..10).collect::<Vec<_>>());
}
