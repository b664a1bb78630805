use async_trait::async_trait;
use bio_protocol::{names, ObjectPath, Value};
use std::sync::Arc;

use super::{unknown_method, SkeletonContext};
use crate::codec::{arg, expect_arity};
use crate::data::{Application, Reason, TemplateId, User};
use crate::device::{Identifier, TemplateStore, Verifier};
use crate::error::Result;
use crate::ipc::bus::{CallContext, Object};

pub struct TemplateStoreSkeleton {
    context: Arc<SkeletonContext>,
    store: Arc<dyn TemplateStore>,
    path: ObjectPath,
}

impl TemplateStoreSkeleton {
    pub fn new(context: Arc<SkeletonContext>, store: Arc<dyn TemplateStore>, path: ObjectPath) -> Arc<Self> {
        Arc::new(Self { context, store, path })
    }
}

#[async_trait]
impl Object for TemplateStoreSkeleton {
    fn interface(&self) -> &'static str {
        names::TEMPLATE_STORE
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        use names::member::*;

        let arity = match member {
            SIZE | LIST | ENROLL | CLEAR => 2,
            REMOVE => 3,
            other => return Err(unknown_method(names::TEMPLATE_STORE, other)),
        };
        expect_arity(args, arity)?;
        let claimed_app: Application = arg(args, 0)?;
        let claimed_user: User = arg(args, 1)?;
        let (app, user) = self
            .context
            .authorize(ctx, &claimed_app, Some(claimed_user))
            .await?;

        let (store, path, context) = (&self.store, &self.path, &self.context);
        match member {
            SIZE => context.export_operation(ctx, path, store.size(&app, &user).await?),
            LIST => context.export_operation(ctx, path, store.list(&app, &user).await?),
            ENROLL => context.export_operation(ctx, path, store.enroll(&app, &user).await?),
            CLEAR => context.export_operation(ctx, path, store.clear(&app, &user).await?),
            _ => {
                let id: TemplateId = arg(args, 2)?;
                context.export_operation(ctx, path, store.remove(&app, &user, id).await?)
            }
        }
    }
}

pub struct IdentifierSkeleton {
    context: Arc<SkeletonContext>,
    identifier: Arc<dyn Identifier>,
    path: ObjectPath,
}

impl IdentifierSkeleton {
    pub fn new(context: Arc<SkeletonContext>, identifier: Arc<dyn Identifier>, path: ObjectPath) -> Arc<Self> {
        Arc::new(Self {
            context,
            identifier,
            path,
        })
    }
}

#[async_trait]
impl Object for IdentifierSkeleton {
    fn interface(&self) -> &'static str {
        names::IDENTIFIER
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        if member != names::member::IDENTIFY_USER {
            return Err(unknown_method(names::IDENTIFIER, member));
        }
        expect_arity(args, 2)?;
        let claimed_app: Application = arg(args, 0)?;
        let reason: Reason = arg(args, 1)?;
        let (app, _) = self.context.authorize(ctx, &claimed_app, None).await?;

        let op = self.identifier.identify_user(&app, &reason).await?;
        self.context.export_operation(ctx, &self.path, op)
    }
}

pub struct VerifierSkeleton {
    context: Arc<SkeletonContext>,
    verifier: Arc<dyn Verifier>,
    path: ObjectPath,
}

impl VerifierSkeleton {
    pub fn new(context: Arc<SkeletonContext>, verifier: Arc<dyn Verifier>, path: ObjectPath) -> Arc<Self> {
        Arc::new(Self {
            context,
            verifier,
            path,
        })
    }
}

#[async_trait]
impl Object for VerifierSkeleton {
    fn interface(&self) -> &'static str {
        names::VERIFIER
    }

    async fn invoke(&self, ctx: &CallContext, member: &str, args: &[Value]) -> Result<Value> {
        if member != names::member::VERIFY_USER {
            return Err(unknown_method(names::VERIFIER, member));
        }
        expect_arity(args, 3)?;
        let claimed_app: Application = arg(args, 0)?;
        let claimed_user: User = arg(args, 1)?;
        let reason: Reason = arg(args, 2)?;
        let (app, user) = self
            .context
            .authorize(ctx, &claimed_app, Some(claimed_user))
            .await?;

        let op = self.verifier.verify_user(&app, &user, &reason).await?;
        self.context.export_operation(ctx, &self.path, op)
    }
}
