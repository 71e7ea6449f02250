use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// One bar per scenario on stderr; stdout stays free for the summary.
pub(crate) struct HumanProgress {
    inner: Mutex<Inner>,
}

struct Inner {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl HumanProgress {
    pub(crate) fn new() -> Self {
        let multi = MultiProgress::new();
        multi.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        Self {
            inner: Mutex::new(Inner {
                multi,
                bars: HashMap::new(),
            }),
        }
    }

    pub(crate) fn update(
        &self,
        scenario: &str,
        total: Duration,
        elapsed: Duration,
        done: bool,
        message: String,
    ) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let pb = inner.bar(scenario);
        let total_ms = total.as_millis() as u64;
        pb.set_length(total_ms.max(1));
        pb.set_position((elapsed.as_millis() as u64).min(total_ms));
        if done && !pb.is_finished() {
            pb.finish_with_message(message);
        } else if !done {
            pb.set_message(message);
        }
    }

    pub(crate) fn finish(&self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        for (_, pb) in inner.bars.drain() {
            pb.finish_and_clear();
        }
        let _ = inner.multi.clear();
    }
}

impl Inner {
    fn bar(&mut self, scenario: &str) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(scenario.to_string()).or_insert_with(|| {
            let pb = multi.add(ProgressBar::new(1));
            pb.set_style(bar_style());
            pb.set_prefix(scenario.to_string());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        })
    }
}

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix} [ {bar:20.cyan/blue} ] {percent:>3}% {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█░")
}
