//! Collaborators shared by the repair orchestrators.

use crate::error::Abort;
use crate::io::approval::Approver;
use crate::io::git::Git;
use crate::io::llm::LlmClient;
use crate::io::patch::PatchApplier;
use crate::io::prompt::PromptEngine;
use crate::options::RunContext;

/// One repair run: the resolved context plus the adapters it drives.
///
/// Generic over the LLM and approval seams so tests can script both.
pub struct RepairSession<'a, L, A> {
    pub ctx: &'a RunContext,
    pub git: Git,
    pub applier: PatchApplier,
    pub prompts: PromptEngine,
    pub llm: &'a L,
    pub approver: &'a A,
}

impl<'a, L: LlmClient, A: Approver> RepairSession<'a, L, A> {
    pub fn new(ctx: &'a RunContext, llm: &'a L, approver: &'a A) -> Result<Self, Abort> {
        Ok(Self {
            ctx,
            git: Git::new(&ctx.root),
            applier: PatchApplier::new(&ctx.root),
            prompts: PromptEngine::new()?,
            llm,
            approver,
        })
    }

    pub fn with_applier(mut self, applier: PatchApplier) -> Self {
        self.applier = applier;
        self
    }
}
