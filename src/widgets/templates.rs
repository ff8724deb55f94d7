use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Template {
    pub id: u64,
    pub name: String,
    pub category: String,
    pub description: String,
    pub html: String,
    pub css: String,
    pub js: String,
    pub created_at: String,
}

/// Read-only set of widget templates.
#[derive(Debug, Clone)]
pub struct TemplateCatalog {
    templates: Vec<Template>,
}

impl TemplateCatalog {
    pub fn builtin() -> Self {
        Self {
            templates: vec![Template {
                id: 1,
                name: "Price Display".to_string(),
                category: "trading".to_string(),
                description: "Basic template showing a live price".to_string(),
                html: "<div class='price-widget'>{{price}}</div>".to_string(),
                css: ".price-widget { font-size: 2rem; }".to_string(),
                js: "console.log('Price widget loaded');".to_string(),
                created_at: "2024-01-15T11:00:00Z".to_string(),
            }],
        }
    }

    pub fn all(&self) -> &[Template] {
        &self.templates
    }

    pub fn get(&self, id: u64) -> Option<&Template> {
        self.templates.iter().find(|t| t.id == id)
    }
}
