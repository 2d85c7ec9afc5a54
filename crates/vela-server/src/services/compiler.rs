//! Pipeline compiler engine.

use async_trait::async_trait;
use parking_lot::RwLock;
use vela_core::{Build, CompiledPipeline, Compiler, CompilerSettings, Repo, SharedSettings};

/// Pipeline format produced by this engine.
pub const PIPELINE_VERSION: &str = "1";

/// Compiles builds with the limits from the live platform settings.
pub struct NativeCompiler {
    defaults: CompilerSettings,
    live: RwLock<Option<SharedSettings>>,
}

impl NativeCompiler {
    pub fn new(defaults: CompilerSettings) -> Self {
        Self {
            defaults,
            live: RwLock::new(None),
        }
    }

    fn current(&self) -> CompilerSettings {
        match self.live.read().as_ref() {
            Some(shared) => shared.load().compiler.clone(),
            None => self.defaults.clone(),
        }
    }
}

#[async_trait]
impl Compiler for NativeCompiler {
    fn settings(&self) -> CompilerSettings {
        self.defaults.clone()
    }

    fn set_settings(&self, settings: SharedSettings) {
        *self.live.write() = Some(settings);
    }

    async fn compile(&self, repo: &Repo, build: &Build) -> vela_core::Result<CompiledPipeline> {
        if build.clone.is_empty() {
            return Err(vela_core::Error::Compile(format!(
                "no clone url for {}",
                repo.full_name
            )));
        }
        if build.r#ref.is_empty() {
            return Err(vela_core::Error::Compile(format!(
                "no ref for build of {}",
                repo.full_name
            )));
        }

        let settings = self.current();
        if settings.clone_image.is_empty() {
            return Err(vela_core::Error::Compile(
                "no clone image configured".to_string(),
            ));
        }

        Ok(CompiledPipeline {
            version: PIPELINE_VERSION.to_string(),
            clone_image: settings.clone_image,
            template_depth: settings.template_depth,
            starlark_exec_limit: settings.starlark_exec_limit,
            worker_route: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vela_core::{BuildStatus, Event, Platform};

    fn defaults() -> CompilerSettings {
        CompilerSettings {
            clone_image: "target/vela-git-slim:latest".to_string(),
            template_depth: 3,
            starlark_exec_limit: 7500,
        }
    }

    fn repo() -> Repo {
        Repo {
            id: 7,
            owner_id: 1,
            org: "octocat".to_string(),
            name: "hello".to_string(),
            full_name: "octocat/hello".to_string(),
            clone_url: "https://github.com/octocat/hello.git".to_string(),
            default_branch: "main".to_string(),
            active: true,
            approval_timeout: 7,
        }
    }

    fn build() -> Build {
        Build {
            id: 0,
            repo_id: 7,
            number: 0,
            event: Event::Schedule,
            status: BuildStatus::Pending,
            error: String::new(),
            author: "octocat".to_string(),
            sender: "octocat".to_string(),
            sender_scm_id: "1".to_string(),
            branch: "main".to_string(),
            r#ref: "refs/heads/main".to_string(),
            message: String::new(),
            clone: "https://github.com/octocat/hello.git".to_string(),
            route: String::new(),
            enqueued: 0,
            created: 0,
        }
    }

    #[tokio::test]
    async fn test_compile_uses_defaults_before_settings_load() {
        let compiler = NativeCompiler::new(defaults());
        let pipeline = compiler.compile(&repo(), &build()).await.unwrap();
        assert_eq!(pipeline.clone_image, "target/vela-git-slim:latest");
        assert_eq!(pipeline.template_depth, 3);
        assert_eq!(pipeline.version, PIPELINE_VERSION);
    }

    #[tokio::test]
    async fn test_compile_follows_live_settings() {
        let compiler = NativeCompiler::new(defaults());
        let shared = SharedSettings::new(Platform {
            compiler: defaults(),
            ..Default::default()
        });
        compiler.set_settings(shared.clone());

        let mut next = (*shared.load()).clone();
        next.compiler.clone_image = "git:next".to_string();
        next.compiler.starlark_exec_limit = 100;
        shared.store(next);

        let pipeline = compiler.compile(&repo(), &build()).await.unwrap();
        assert_eq!(pipeline.clone_image, "git:next");
        assert_eq!(pipeline.starlark_exec_limit, 100);
        // engine defaults are what it reports, not the live values
        assert_eq!(compiler.settings(), defaults());
    }

    #[tokio::test]
    async fn test_compile_requires_clone_url() {
        let compiler = NativeCompiler::new(defaults());
        let mut b = build();
        b.clone = String::new();
        assert!(matches!(
            compiler.compile(&repo(), &b).await,
            Err(vela_core::Error::Compile(_))
        ));
    }
}
