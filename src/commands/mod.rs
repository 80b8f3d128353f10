pub mod nodes;
pub mod run;
pub mod trust;

use crate::ui;

/// Print the category and advice of an executor failure, if `err` is one.
pub fn report(err: &anyhow::Error) {
    if let Some(exec_err) = err.downcast_ref::<executor::Error>() {
        let category = exec_err.category();
        ui::error(&format!("{category}: {exec_err}"));
        ui::dim(category.advice());
    }
}
