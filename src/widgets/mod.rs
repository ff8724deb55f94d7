pub mod store;
pub mod templates;

pub use store::{NewWidget, Widget, WidgetPatch, WidgetStore, WidgetSummary};
pub use templates::{Template, TemplateCatalog};
