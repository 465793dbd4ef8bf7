use std::borrow::Cow;

use indicatif::ProgressBar;

pub trait ProgressRenderedText {
    /// Rendered text of a progress step
    fn msg(&self) -> String;
}

/// Renders progress either through a spinner or by plain printing.
///
/// CI logs are line-oriented, so the plain variant prints every message on
/// its own line instead of redrawing.
#[derive(Debug, Default)]
pub struct ProgressRenderer {
    bar: Option<ProgressBar>,
}

impl ProgressRenderer {
    pub fn set_message(&self, msg: impl Into<Cow<'static, str>>) {
        match &self.bar {
            Some(bar) => bar.set_message(msg),
            None => println!("{}", msg.into()),
        }
    }

    pub fn println(&self, msg: impl Into<Cow<'static, str>>) {
        match &self.bar {
            Some(bar) => bar.println(msg.into()),
            None => println!("{}", msg.into()),
        }
    }

    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl From<ProgressBar> for ProgressRenderer {
    fn from(bar: ProgressBar) -> Self {
        Self { bar: Some(bar) }
    }
}
