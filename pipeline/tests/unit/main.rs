mod test_cache;
mod test_fsm;
