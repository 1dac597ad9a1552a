//! Scripted text service fakes shared by the batch tests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use crate::dataset::{Dataset, Record};
use crate::error::AppError;
use crate::text_service::{AskResponse, ServiceConnector, TextService};

#[derive(Default)]
struct FakeState {
    prompts: Vec<String>,
    /// Remaining failures per prompt.
    failures: HashMap<String, usize>,
    connects: usize,
}

/// Answers `label:<prompt>` unless the prompt is scripted to fail.
///
/// Clones share state, so sessions handed out by `FakeConnector` see the
/// same script and call log.
#[derive(Clone, Default)]
pub(crate) struct FakeService {
    state: Arc<Mutex<FakeState>>,
}

impl FakeService {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fails the next `times` requests for `prompt`.
    pub(crate) fn fail_times(&self, prompt: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(prompt.to_string(), times);
    }

    /// Every prompt received so far, in order.
    pub(crate) fn prompts(&self) -> Vec<String> {
        self.state.lock().unwrap().prompts.clone()
    }

    pub(crate) fn connects(&self) -> usize {
        self.state.lock().unwrap().connects
    }

    pub(crate) fn connector(&self) -> Arc<dyn ServiceConnector> {
        Arc::new(FakeConnector {
            service: self.clone(),
        })
    }
}

impl TextService for FakeService {
    fn ask<'a>(&'a self, prompt: &'a str) -> Pin<Box<dyn Future<Output = AskResponse> + Send + 'a>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.prompts.push(prompt.to_string());
            match state.failures.get_mut(prompt) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    AskResponse::failed("scripted failure")
                }
                _ => AskResponse::answered(format!("label:{}", prompt)),
            }
        })
    }
}

struct FakeConnector {
    service: FakeService,
}

impl ServiceConnector for FakeConnector {
    fn connect(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn TextService>, AppError>> + Send + '_>> {
        Box::pin(async move {
            self.service.state.lock().unwrap().connects += 1;
            Ok(Box::new(self.service.clone()) as Box<dyn TextService>)
        })
    }
}

/// `n` records keyed `0..n` with prompts `p0..p{n-1}`.
pub(crate) fn records(n: usize) -> Vec<Record> {
    (0..n)
        .map(|i| Record {
            index: i,
            key: i.to_string(),
            fields: vec![i.to_string(), format!("answer {}", i)],
            payload: format!("p{}", i),
        })
        .collect()
}

pub(crate) fn dataset(n: usize) -> Dataset {
    Dataset {
        headers: vec!["Index".to_string(), "Answer".to_string()],
        records: records(n),
    }
}
