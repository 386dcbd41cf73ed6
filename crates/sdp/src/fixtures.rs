pub(crate) const CHROME_OFFER: &str = concat!(
    "v=0\r\n",
    "o=- 4611731400430051336 2 IN IP4 127.0.0.1\r\n",
    "s=-\r\n",
    "t=0 0\r\n",
    "a=group:BUNDLE 0 1\r\n",
    "a=msid-semantic: WMS stream\r\n",
    "m=audio 9 UDP/TLS/RTP/SAVPF 111 103 0 8 126\r\n",
    "c=IN IP4 0.0.0.0\r\n",
    "a=rtcp:9 IN IP4 0.0.0.0\r\n",
    "a=mid:0\r\n",
    "a=sendrecv\r\n",
    "a=rtpmap:111 opus/48000/2\r\n",
    "a=rtcp-fb:111 transport-cc\r\n",
    "a=fmtp:111 minptime=10;useinbandfec=1\r\n",
    "a=rtpmap:103 ISAC/16000\r\n",
    "a=rtpmap:0 PCMU/8000\r\n",
    "a=rtpmap:8 PCMA/8000\r\n",
    "a=rtpmap:126 telephone-event/8000\r\n",
    "m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99 116 117 118\r\n",
    "c=IN IP4 0.0.0.0\r\n",
    "a=rtcp:9 IN IP4 0.0.0.0\r\n",
    "a=mid:1\r\n",
    "a=sendrecv\r\n",
    "a=rtpmap:96 VP8/90000\r\n",
    "a=rtcp-fb:96 goog-remb\r\n",
    "a=rtcp-fb:96 nack\r\n",
    "a=rtpmap:97 rtx/90000\r\n",
    "a=fmtp:97 apt=96\r\n",
    "a=rtpmap:98 H264/90000\r\n",
    "a=fmtp:98 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f\r\n",
    "a=rtpmap:99 rtx/90000\r\n",
    "a=fmtp:99 apt=98\r\n",
    "a=rtpmap:116 red/90000\r\n",
    "a=rtpmap:117 ulpfec/90000\r\n",
    "a=rtpmap:118 rtx/90000\r\n",
    "a=fmtp:118 apt=116\r\n",
);
