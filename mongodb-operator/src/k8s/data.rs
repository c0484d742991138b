use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use kube::runtime::watcher::Event;
use kube::Resource;

use crate::k8s::scheduler::SchedulerTask;
use crate::k8s::{Controller, EventResult};
use mongodb_core::crd::{MongoDB, MongoDBUser};

//////////////////////////////////////////////////////////////////////////////
// MongoDB Events ////////////////////////////////////////////////////////////
impl Controller {
    /// Handle `MongoDB` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_mongodb_event(&mut self, res: EventResult<MongoDB>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from MongoDB k8s watcher");
                let _ = tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.mongodb_applied(obj).await,
            Event::Deleted(obj) => self.mongodb_deleted(obj).await,
            Event::Restarted(objs) => self.mongodb_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, mdb))]
    async fn mongodb_applied(&mut self, mdb: MongoDB) {
        let name_str = match mdb.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let (name, spec_changed) = match self.mongodbs.get_key_value(name_str) {
            Some((key, old)) => {
                if old == &mdb {
                    return;
                }
                // Status patches written by this controller come back through the watcher.
                (Arc::clone(key), old.spec != mdb.spec || old.meta().generation != mdb.meta().generation)
            }
            None => (Arc::new(name_str.clone()), true),
        };
        self.mongodbs.insert(name.clone(), mdb);
        if spec_changed {
            self.spawn_scheduler_task(SchedulerTask::MongoDBUpdated(name), None);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, mdb))]
    async fn mongodb_deleted(&mut self, mdb: MongoDB) {
        let name_str = match mdb.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let name = match self.mongodbs.remove_entry(name_str) {
            Some((name, _old)) => name,
            None => Arc::new(name_str.clone()),
        };
        self.mongodb_requeues.remove(&name);
        self.spawn_scheduler_task(SchedulerTask::MongoDBDeleted(name, mdb), None);
    }

    #[tracing::instrument(level = "debug", skip(self, mdbs))]
    async fn mongodb_restarted(&mut self, mdbs: Vec<MongoDB>) {
        // Objects deleted while the watch was down only show up as missing from the new listing.
        let live: HashSet<String> = mdbs.iter().filter_map(|mdb| mdb.meta().name.clone()).collect();
        let missed: Vec<MongoDB> = self
            .mongodbs
            .iter()
            .filter(|(name, _)| !live.contains(name.as_str()))
            .map(|(_, mdb)| mdb.clone())
            .collect();
        for mdb in missed {
            self.mongodb_deleted(mdb).await;
        }
        for mdb in mdbs {
            self.mongodb_applied(mdb).await;
        }
    }
}

//////////////////////////////////////////////////////////////////////////////
// MongoDBUser Events ////////////////////////////////////////////////////////
impl Controller {
    /// Handle `MongoDBUser` watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_user_event(&mut self, res: EventResult<MongoDBUser>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from MongoDBUser k8s watcher");
                let _ = tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.user_applied(obj).await,
            Event::Deleted(obj) => self.user_deleted(obj).await,
            Event::Restarted(objs) => self.user_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, user))]
    async fn user_applied(&mut self, user: MongoDBUser) {
        let name_str = match user.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let (name, spec_changed) = match self.users.get_key_value(name_str) {
            Some((key, old)) => {
                if old == &user {
                    return;
                }
                (Arc::clone(key), old.spec != user.spec || old.meta().generation != user.meta().generation)
            }
            None => (Arc::new(name_str.clone()), true),
        };
        self.users.insert(name.clone(), user);
        if spec_changed {
            self.spawn_scheduler_task(SchedulerTask::UserUpdated(name), None);
        }
    }

    #[tracing::instrument(level = "debug", skip(self, user))]
    async fn user_deleted(&mut self, user: MongoDBUser) {
        let name_str = match user.meta().name.as_ref() {
            Some(name_str) => name_str,
            None => return, // Not actually possible as K8s requires name.
        };
        let name = match self.users.remove_entry(name_str) {
            Some((name, _old)) => name,
            None => Arc::new(name_str.clone()),
        };
        self.user_requeues.remove(&name);
        self.spawn_scheduler_task(SchedulerTask::UserDeleted(name, user), None);
    }

    #[tracing::instrument(level = "debug", skip(self, users))]
    async fn user_restarted(&mut self, users: Vec<MongoDBUser>) {
        let live: HashSet<String> = users.iter().filter_map(|user| user.meta().name.clone()).collect();
        let missed: Vec<MongoDBUser> = self
            .users
            .iter()
            .filter(|(name, _)| !live.contains(name.as_str()))
            .map(|(_, user)| user.clone())
            .collect();
        for user in missed {
            self.user_deleted(user).await;
        }
        for user in users {
            self.user_applied(user).await;
        }
    }
}
