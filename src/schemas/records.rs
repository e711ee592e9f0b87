use super::{check_email, check_len, check_url, Validate, ValidationErrors};
use crate::{
    credits::repo_types::Credit,
    generations::repo_types::Generation,
    templates::repo_types::{NewPromptTemplate, PromptTemplate},
    users::repo_types::{User, UserUpdate},
};

impl Validate for User {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_email(&mut errs, "email", &self.email);
        if let Some(url) = &self.avatar_url {
            check_url(&mut errs, "avatar_url", url);
        }
        errs.finish(())
    }
}

impl Validate for UserUpdate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        if let Some(url) = &self.avatar_url {
            check_url(&mut errs, "avatar_url", url);
        }
        errs.finish(())
    }
}

impl Validate for Credit {
    // Every constraint on a ledger entry is carried by its Rust type.
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

impl Validate for Generation {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_len(&mut errs, "prompt", &self.prompt, 1, 2000);
        if let Some(url) = &self.video_url {
            check_url(&mut errs, "video_url", url);
        }
        if let Some(url) = &self.thumbnail_url {
            check_url(&mut errs, "thumbnail_url", url);
        }
        if let Some(meta) = &self.metadata {
            if !meta.is_object() {
                errs.add("metadata", "object", "Expected object");
            }
        }
        if self.credits_used < 0 {
            errs.add("credits_used", "min", "Must be greater than or equal to 0");
        }
        errs.finish(())
    }
}

fn check_template_fields(
    errs: &mut ValidationErrors,
    title: &str,
    description: &str,
    template: &str,
) {
    check_len(errs, "title", title, 1, 100);
    check_len(errs, "description", description, 1, 500);
    check_len(errs, "template", template, 1, 2000);
}

impl Validate for PromptTemplate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_template_fields(&mut errs, &self.title, &self.description, &self.template);
        errs.finish(())
    }
}

impl Validate for NewPromptTemplate {
    fn validate(&self) -> Result<(), ValidationErrors> {
        let mut errs = ValidationErrors::new();
        check_template_fields(&mut errs, &self.title, &self.description, &self.template);
        errs.finish(())
    }
}
