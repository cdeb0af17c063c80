use crate::error::{Result, StoreError};
use crate::model::{is_valid_id, Channel, ChannelMember};
use crate::request::{ChannelRequest, ChannelResponse};
use crate::supplier::{Chain, Dispatcher, Hint, StoreHandle};
use std::sync::Arc;

/// Channel entity store; methods mirror [`PostStore`](crate::store::PostStore)
#[derive(Clone)]
pub struct ChannelStore {
    chain: Arc<Chain<ChannelRequest>>,
    dispatcher: Arc<Dispatcher>,
}

impl ChannelStore {
    pub(crate) fn new(chain: Arc<Chain<ChannelRequest>>, dispatcher: Arc<Dispatcher>) -> Self {
        Self { chain, dispatcher }
    }

    fn dispatch<T, F>(
        &self,
        check: Result<()>,
        req: impl FnOnce() -> ChannelRequest,
        hints: Vec<Hint>,
        extract: F,
    ) -> StoreHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(ChannelResponse) -> Result<T> + Send + 'static,
    {
        if let Err(e) = check {
            return StoreHandle::ready(Err(e));
        }
        self.dispatcher.dispatch(
            self.dispatcher.context(),
            self.chain.clone(),
            req(),
            hints,
            extract,
        )
    }

    pub fn save(&self, mut channel: Channel) -> StoreHandle<Channel> {
        channel.pre_save();
        let check = channel.is_valid();
        self.dispatch(check, || ChannelRequest::Save(channel), Vec::new(), ChannelResponse::into_channel)
    }

    pub fn get(&self, id: impl Into<String>, allow_cache: bool) -> StoreHandle<Channel> {
        let id = id.into();
        let check = if is_valid_id(&id) {
            Ok(())
        } else {
            Err(StoreError::validation("channel_id", format!("invalid id {:?}", id)))
        };
        let hints = if allow_cache { Vec::new() } else { vec![Hint::BypassCache] };
        self.dispatch(check, || ChannelRequest::Get { id }, hints, ChannelResponse::into_channel)
    }

    pub fn add_member(&self, member: ChannelMember) -> StoreHandle<ChannelMember> {
        let check = member.is_valid();
        self.dispatch(check, || ChannelRequest::AddMember(member), Vec::new(), ChannelResponse::into_member)
    }

    pub fn remove_member(&self, channel_id: impl Into<String>, user_id: impl Into<String>) -> StoreHandle<()> {
        let member = ChannelMember::new(channel_id, user_id);
        let check = member.is_valid();
        self.dispatch(
            check,
            || ChannelRequest::RemoveMember {
                channel_id: member.channel_id,
                user_id: member.user_id,
            },
            Vec::new(),
            ChannelResponse::into_done,
        )
    }

    /// Soft-delete a channel at `time`
    pub fn delete(&self, id: impl Into<String>, time: i64) -> StoreHandle<()> {
        let id = id.into();
        let check = if is_valid_id(&id) {
            Ok(())
        } else {
            Err(StoreError::validation("channel_id", format!("invalid id {:?}", id)))
        };
        self.dispatch(check, || ChannelRequest::Delete { id, time }, Vec::new(), ChannelResponse::into_done)
    }
}
