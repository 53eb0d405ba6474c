pub(crate) mod large_messages;
