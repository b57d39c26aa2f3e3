use crate::error::InferenceError;
use crate::server::types::PageView;
use minijinja::Environment;

const INDEX_TEMPLATE: &str = include_str!("../../templates/index.html");

/// Compiled page templates. Names ending in `.html` are auto-escaped.
pub struct Views {
    env: Environment<'static>,
}

impl Views {
    pub fn new() -> Result<Self, InferenceError> {
        let mut env = Environment::new();
        env.add_template("index.html", INDEX_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn render_page(&self, page: &PageView) -> Result<String, InferenceError> {
        let template = self.env.get_template("index.html")?;
        Ok(template.render(page)?)
    }
}
