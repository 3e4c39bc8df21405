use minijinja::{context, Environment};

use crate::models::Task;

const INDEX_TEMPLATE: &str = "index.html";
const ADD_TASK_TEMPLATE: &str = "add_task.html";

/// Page templates compiled once at startup. `.html` names get HTML auto-escaping.
pub struct Templates {
    env: Environment<'static>,
}

impl Templates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(INDEX_TEMPLATE, include_str!("../templates/index.html"))?;
        env.add_template(ADD_TASK_TEMPLATE, include_str!("../templates/add_task.html"))?;
        Ok(Self { env })
    }

    pub fn render_index(&self, tasks: &[Task]) -> Result<String, minijinja::Error> {
        self.env
            .get_template(INDEX_TEMPLATE)?
            .render(context! { tasks => tasks })
    }

    pub fn render_add_form(&self) -> Result<String, minijinja::Error> {
        self.env.get_template(ADD_TASK_TEMPLATE)?.render(context! {})
    }
}
